#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use drnav_api::{ApiError, Controller, Deps, DrnavApi, Mode, RemoteOps, SiteManagerReply, SiteManagerRequest};
use drnav_core::{CanonicalService, Families, Family, RawResource, SchemaVersion, ServiceRegistry, SiteManagerV3};
use drnav_kubehub::MemoryStore;
use drnav_ops::{Dispatched, ProbeError, ServiceStatus, TransportError};
use drnav_schema::ConversionError;
use drnav_store::{LiveSource, StaticSource};

/// Probe answers derive from the service name; dispatch answers with a fixed status.
struct Stub {
    probed: Mutex<Vec<String>>,
    dispatch_status: u16,
    dispatch_down: bool,
    /// Service whose status endpoint never answers.
    unreachable: Option<&'static str>,
}

impl Stub {
    fn new() -> Self { Self { probed: Mutex::new(Vec::new()), dispatch_status: 200, dispatch_down: false, unreachable: None } }
}

#[async_trait::async_trait]
impl RemoteOps for Stub {
    async fn probe(&self, svc: &CanonicalService) -> Result<ServiceStatus, ProbeError> {
        self.probed.lock().unwrap().push(svc.name.clone());
        if self.unreachable == Some(svc.name.as_str()) {
            return Err(ProbeError::Unreachable {
                service: svc.name.clone(),
                source: TransportError::Request {
                    method: "GET",
                    url: format!("http://{}/sitemanager", svc.name),
                    reason: "connection refused".into(),
                },
            });
        }
        Ok(ServiceStatus {
            mode: "active".into(),
            status: "done".into(),
            health: "up".into(),
            message: format!("{} ok", svc.name),
        })
    }

    async fn dispatch(&self, svc: &CanonicalService, mode: Mode, _no_wait: bool) -> Result<Dispatched, TransportError> {
        if self.dispatch_down {
            return Err(TransportError::Request {
                method: "POST",
                url: svc.parameters.service_endpoint.clone(),
                reason: "connection refused".into(),
            });
        }
        let failed = self.dispatch_status != 200;
        let message = if failed { format!("Procedure {} failed", mode) } else { format!("Procedure {} is started", mode) };
        Ok(Dispatched { message, failed, status: self.dispatch_status })
    }
}

fn svc(name: &str, after: &[&str], before: &[&str]) -> (String, CanonicalService) {
    let svc = CanonicalService {
        name: name.to_string(),
        uid: format!("{}-uid", name),
        after: after.iter().map(|s| s.to_string()).collect(),
        before: before.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    (name.to_string(), svc)
}

fn controller<const N: usize>(entries: [(String, CanonicalService); N], stub: Arc<Stub>) -> Controller {
    let reg: ServiceRegistry = entries.into_iter().collect();
    Controller::new(Arc::new(StaticSource::new(reg, "http://")), stub)
}

#[tokio::test]
async fn end_to_end_walk_reaches_every_dependency() {
    let stub = Arc::new(Stub::new());
    let api = controller(
        [svc("A", &[], &[]), svc("B", &[], &["A"]), svc("C", &["B"], &["A"]), svc("D", &["A", "C"], &[])],
        stub.clone(),
    );
    let resp = api.status("D", true).await.unwrap();
    let names: Vec<_> = resp.services.keys().cloned().collect();
    assert_eq!(names, vec!["A", "B", "C", "D"]);
    for (name, after, before) in [("A", vec![], vec![]), ("B", vec![], vec!["A"]), ("C", vec!["B"], vec!["A"]), ("D", vec!["A", "C"], vec![])] {
        let entry = &resp.services[name];
        assert_eq!(entry.message, format!("{} ok", name));
        assert_eq!(entry.health, "up");
        let want = Deps {
            after: after.into_iter().map(String::from).collect(),
            before: before.into_iter().map(String::from).collect(),
        };
        assert_eq!(entry.deps.as_ref(), Some(&want));
    }
    assert_eq!(stub.probed.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn cyclic_links_terminate() {
    let api = controller([svc("A", &[], &["B"]), svc("B", &["A"], &[])], Arc::new(Stub::new()));
    let resp = api.status("A", true).await.unwrap();
    assert_eq!(resp.services.keys().cloned().collect::<Vec<_>>(), vec!["A", "B"]);
}

#[tokio::test]
async fn missing_dependency_fails_the_whole_walk() {
    let entries = || [svc("E", &["F"], &[]), svc("F", &[], &["X"]), svc("G", &[], &[])];
    let api = controller(entries(), Arc::new(Stub::new()));
    let err = api.status("E", true).await.unwrap_err();
    assert_eq!(err, ApiError::DependencyNotFound { missing: "X".into(), referrer: "F".into() });
    assert_eq!(err.status_code(), 400);

    let stub = Arc::new(Stub::new());
    let api = controller(entries(), stub.clone());
    let resp = api.status("F", false).await.unwrap();
    assert_eq!(resp.services.len(), 1);
    assert!(resp.services["F"].deps.is_none());
    assert_eq!(*stub.probed.lock().unwrap(), vec!["F"]);
}

#[tokio::test]
async fn unreachable_service_mid_walk_fails_the_whole_status() {
    let stub = Arc::new(Stub { unreachable: Some("C"), ..Stub::new() });
    let api = controller(
        [svc("A", &[], &[]), svc("B", &[], &["A"]), svc("C", &["B"], &["A"]), svc("D", &["A", "C"], &[])],
        stub.clone(),
    );
    let err = api.status("D", true).await.unwrap_err();
    assert!(matches!(err, ApiError::ProbeFailed(ref e) if e.service() == "C"), "unexpected error {:?}", err);
    assert_eq!(err.status_code(), 500);
    let body = err.body();
    assert_eq!(body.service.as_deref(), Some("C"));
    assert_eq!(body.problem_cr, None);
    assert_eq!(
        serde_json::to_value(&body).unwrap()["wrong-service"],
        serde_json::json!("C")
    );
    // D, then A, then C: the walk stopped at C and never reached B
    assert_eq!(*stub.probed.lock().unwrap(), vec!["D", "A", "C"]);

    // the same registry still answers for services that do not reach C
    let resp = api.status("B", true).await.unwrap();
    assert_eq!(resp.services.keys().cloned().collect::<Vec<_>>(), vec!["A", "B"]);
}

#[tokio::test]
async fn without_deps_probes_exactly_one_service() {
    let stub = Arc::new(Stub::new());
    let api = controller([svc("A", &["B"], &[]), svc("B", &[], &[])], stub.clone());
    let resp = api.status("A", false).await.unwrap();
    assert_eq!(resp.services.len(), 1);
    assert_eq!(stub.probed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn procedures_report_started_and_failed() {
    let api = controller([svc("A", &[], &[])], Arc::new(Stub::new()));
    let ok = api.process("A", Mode::Active, false).await.unwrap();
    assert_eq!(ok.message, "Procedure active is started");
    assert_eq!((ok.service.as_str(), ok.procedure.as_str(), ok.failed), ("A", "active", false));

    let stub = Stub { dispatch_status: 500, ..Stub::new() };
    let api = controller([svc("A", &[], &[])], Arc::new(stub));
    let bad = api.process("A", Mode::Standby, true).await.unwrap();
    assert!(bad.failed);
    assert_eq!(bad.message, "Procedure standby failed");
    assert_eq!(bad.status_code(), 400);

    assert_eq!(
        api.process("Z", Mode::Disable, false).await.unwrap_err(),
        ApiError::ServiceNotFound { service: "Z".into() }
    );
}

#[tokio::test]
async fn exhausted_dispatch_is_an_internal_error() {
    let stub = Stub { dispatch_down: true, ..Stub::new() };
    let api = controller([svc("A", &[], &[])], Arc::new(stub));
    let err = api.process("A", Mode::Active, false).await.unwrap_err();
    assert!(matches!(err, ApiError::Internal { service: Some(ref s), .. } if s == "A"));
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn handle_routes_by_procedure() {
    let api = controller([svc("b", &[], &[]), svc("a", &[], &[])], Arc::new(Stub::new()));
    let reply = api.handle(SiteManagerRequest { procedure: "list".into(), ..Default::default() }).await.unwrap();
    assert_eq!(serde_json::to_value(&reply).unwrap(), serde_json::json!({"allServices": ["a", "b"]}));

    let req = SiteManagerRequest { procedure: "disable".into(), service: Some("a".into()), ..Default::default() };
    match api.handle(req).await.unwrap() {
        SiteManagerReply::Procedure(p) => assert_eq!(p.procedure, "disable"),
        other => panic!("unexpected reply {:?}", other),
    }
}

fn hub(name: &str, ns: &str, uid: &str, alias: Option<&str>) -> RawResource {
    let mut o = SiteManagerV3::default();
    o.metadata.name = Some(name.into());
    o.metadata.namespace = Some(ns.into());
    o.metadata.uid = Some(uid.into());
    o.spec.sitemanager.alias = alias.map(String::from);
    RawResource::V3(o)
}

#[tokio::test]
async fn admission_rejects_names_owned_by_other_objects() {
    let store = MemoryStore::new()
        .with(Family::Legacy, SchemaVersion::V3, vec![hub("svc", "ns", "uid-1", None)])
        .with(Family::Current, SchemaVersion::V3, vec![hub("paas", "ns", "uid-2", Some("paas-alias"))]);
    let api = Controller::new(Arc::new(LiveSource::new(Arc::new(store), "http://")), Arc::new(Stub::new()));

    // new object computing to an existing calculated name
    let err = api.validate_object(&hub("svc", "ns", "uid-3", None)).await.unwrap_err();
    assert_eq!(err.to_string(), "Can't use service with calculated name svc.ns, this name is used for another service");

    // new object taking an existing alias through its own alias
    let err = api.validate_object(&hub("other", "ns", "uid-4", Some("paas-alias"))).await.unwrap_err();
    assert_eq!(err.to_string(), "Can't use service alias paas-alias, this name is used for another service");

    // updating the same object never collides with itself
    assert!(api.validate_object(&hub("svc", "ns", "uid-1", None)).await.is_ok());
    assert!(api.validate_object(&hub("paas", "ns", "uid-2", Some("paas-alias"))).await.is_ok());
    assert!(api.validate_object(&hub("fresh", "ns", "uid-5", None)).await.is_ok());
}

#[tokio::test]
async fn store_failure_surfaces_as_internal_error() {
    let api = Controller::new(
        Arc::new(LiveSource::new(Arc::new(MemoryStore::failing("apiserver down")), "http://")),
        Arc::new(Stub::new()),
    );
    let err = api.list().await.unwrap_err();
    assert!(matches!(err, ApiError::Internal { .. }));
}

#[tokio::test]
async fn conversion_resolves_v2_dependencies_through_the_store() {
    let mut dep = drnav_core::SiteManagerV2::default();
    dep.metadata.name = Some("db".into());
    dep.metadata.namespace = Some("data".into());
    let store = Arc::new(MemoryStore::new().with(Family::Legacy, SchemaVersion::V2, vec![RawResource::V2(dep)]));
    let api = Controller::new(Arc::new(LiveSource::new(store.clone(), "http://")), Arc::new(Stub::new()))
        .with_lookup_store(store);

    let obj = serde_json::json!({
        "apiVersion": "netcracker.com/v2",
        "kind": "SiteManager",
        "metadata": {"name": "app", "namespace": "ns"},
        "spec": {"sitemanager": {"after": ["db", "ghost"], "module": "stateful"}}
    });
    let out = api.convert(obj, "netcracker.com/v3").await.unwrap();
    assert_eq!(out["spec"]["sitemanager"]["after"], serde_json::json!(["db.data", "ghost"]));
}

#[tokio::test]
async fn conversion_only_accepts_the_configured_groups() {
    let families = Families { legacy_group: "legacy.example".into(), ..Families::default() };
    let api = controller([svc("A", &[], &[])], Arc::new(Stub::new())).with_families(families);
    let obj = serde_json::json!({
        "apiVersion": "legacy.example/v1",
        "kind": "SiteManager",
        "metadata": {"name": "app", "namespace": "ns"},
        "spec": {"sitemanager": {"serviceEndpoint": "app:8080"}}
    });
    let out = api.convert(obj.clone(), "legacy.example/v3").await.unwrap();
    assert_eq!(out["apiVersion"], "legacy.example/v3");

    assert_eq!(
        api.convert(obj.clone(), "netcracker.com/v3").await.unwrap_err(),
        ConversionError::UnsupportedVersion("netcracker.com/v3".into())
    );
    let mut foreign = obj;
    foreign["apiVersion"] = serde_json::json!("bogus.io/v1");
    assert_eq!(
        api.convert(foreign, "legacy.example/v3").await.unwrap_err(),
        ConversionError::UnsupportedVersion("bogus.io/v1".into())
    );
}
