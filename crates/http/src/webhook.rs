//! Admission (`/validate`) and CRD conversion (`/convert`) hooks.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use drnav_api::DrnavApi;
use drnav_core::RawResource;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    DynamicObject,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// `apiextensions.k8s.io/v1` ConversionReview, as far as the hook uses it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ConversionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ConversionResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub uid: String,
    pub desired_api_version: String,
    #[serde(default)]
    pub objects: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResponse {
    pub uid: String,
    #[serde(default)]
    pub converted_objects: Vec<serde_json::Value>,
    pub result: ConversionResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConversionResult {
    fn success() -> Self { Self { status: "Success".into(), message: None } }
    fn failure(message: String) -> Self { Self { status: "Failure".into(), message: Some(message) } }
}

/// Routes: `POST /validate`, `POST /convert`.
pub fn webhook_router(api: Arc<dyn DrnavApi>) -> Router {
    Router::new().route("/validate", post(validate)).route("/convert", post(convert)).with_state(api)
}

async fn validate(
    State(api): State<Arc<dyn DrnavApi>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "malformed admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    let resp = admit(api.as_ref(), &req).await;
    counter!("admission_total", 1u64, "allowed" => if resp.allowed { "true" } else { "false" });
    Json(resp.into_review())
}

async fn admit(api: &dyn DrnavApi, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let resp = AdmissionResponse::from(req);
    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return resp;
    }
    let Some(obj) = req.object.as_ref() else {
        return resp.deny("admission request carries no object");
    };
    let raw = match serde_json::to_value(obj).map_err(|e| e.to_string()).and_then(|v| RawResource::from_value(v).map_err(|e| e.to_string())) {
        Ok(raw) => raw,
        Err(reason) => return resp.deny(reason),
    };
    match api.validate_object(&raw).await {
        Ok(()) => {
            info!(name = %raw.name(), namespace = %raw.namespace(), op = ?req.operation, "admission allowed");
            resp
        }
        Err(e) => {
            warn!(name = %raw.name(), namespace = %raw.namespace(), reason = %e, "admission denied");
            resp.deny(e.to_string())
        }
    }
}

async fn convert(State(api): State<Arc<dyn DrnavApi>>, Json(review): Json<ConversionReview>) -> Json<ConversionReview> {
    let Some(req) = review.request else {
        warn!("conversion review without request");
        return Json(ConversionReview {
            api_version: review.api_version,
            kind: review.kind,
            request: None,
            response: Some(ConversionResponse {
                result: ConversionResult::failure("conversion review carries no request".into()),
                ..Default::default()
            }),
        });
    };
    let mut converted = Vec::with_capacity(req.objects.len());
    let mut result = ConversionResult::success();
    for obj in req.objects {
        match api.convert(obj, &req.desired_api_version).await {
            Ok(v) => converted.push(v),
            Err(e) => {
                warn!(uid = %req.uid, desired = %req.desired_api_version, error = %e, "conversion failed");
                converted.clear();
                result = ConversionResult::failure(e.to_string());
                break;
            }
        }
    }
    Json(ConversionReview {
        api_version: review.api_version,
        kind: review.kind,
        request: None,
        response: Some(ConversionResponse { uid: req.uid, converted_objects: converted, result }),
    })
}
