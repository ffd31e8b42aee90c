//! Transitive status walk over after/before links.

use std::collections::BTreeMap;

use drnav_core::ServiceRegistry;
use tracing::{debug, error};

use crate::{ApiError, ApiResult, Deps, RemoteOps, StatusEntry};

/// Probe `root` and, when `with_deps`, every service reachable through `after` then `before`,
/// in pre-order. A name already collected is skipped, which also stops cycles.
/// Any missing dependency or failed probe fails the whole walk; nothing partial is returned.
pub async fn collect_status(
    registry: &ServiceRegistry,
    remote: &dyn RemoteOps,
    root: &str,
    with_deps: bool,
) -> ApiResult<BTreeMap<String, StatusEntry>> {
    if !registry.contains(root) {
        return Err(ApiError::ServiceNotFound { service: root.to_string() });
    }
    let mut out: BTreeMap<String, StatusEntry> = BTreeMap::new();
    // (name, referrer); children pushed in reverse so they pop in declaration order
    let mut stack: Vec<(String, Option<String>)> = vec![(root.to_string(), None)];
    while let Some((name, referrer)) = stack.pop() {
        if out.contains_key(&name) {
            continue;
        }
        let Some(svc) = registry.get(&name) else {
            let referrer = referrer.unwrap_or_default();
            error!(dep = %name, referrer = %referrer, "Found not exist dependency");
            return Err(ApiError::DependencyNotFound { missing: name, referrer });
        };
        let mut entry = StatusEntry::from(remote.probe(svc).await?);
        if with_deps {
            entry.deps = Some(Deps { after: svc.after.clone(), before: svc.before.clone() });
            for dep in svc.after.iter().chain(svc.before.iter()).rev() {
                stack.push((dep.clone(), Some(name.clone())));
            }
        }
        debug!(service = %name, "status collected");
        out.insert(name, entry);
    }
    Ok(out)
}
