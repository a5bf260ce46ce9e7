use crate::classify::{classify, GradeTier, Surface, SubjectArea};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{params_as, required_str};
use crate::ipc::types::{AppState, Request};
use crate::normalize::{normalize_distribution, Distribution};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DistributionParams {
    #[serde(default)]
    below_basic: Option<f64>,
    #[serde(default)]
    basic: Option<f64>,
    #[serde(default)]
    adequate: Option<f64>,
    #[serde(default)]
    advanced: Option<f64>,
}

fn handle_distribution_normalize(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let p: DistributionParams = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let input = Distribution::new(
        p.below_basic.unwrap_or(0.0),
        p.basic.unwrap_or(0.0),
        p.adequate.unwrap_or(0.0),
        p.advanced.unwrap_or(0.0),
    );
    let out = normalize_distribution(input);
    ok(
        &req.id,
        json!({
            "distribution": out,
            "inputTotal": input.total(),
            "total": out.total(),
            "rescaled": out != input
        }),
    )
}

fn handle_proficiency_classify(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let grade = match required_str(req, "grade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let proficiency = match req.params.get("proficiency") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_f64() {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "proficiency must be a number", None),
        },
    };
    let surface = match req.params.get("surface").and_then(|v| v.as_str()) {
        None => Surface::default(),
        Some(s) => match Surface::parse(s) {
            Some(v) => v,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "surface must be one of: screen, export",
                    None,
                )
            }
        },
    };

    let result = classify(&grade, &subject, proficiency);
    ok(
        &req.id,
        json!({
            "label": result.label(surface),
            "kind": result.kind(),
            "band": result.band(),
            "gradeTier": GradeTier::parse(&grade),
            "subjectArea": SubjectArea::parse(&subject)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "distribution.normalize" => Some(handle_distribution_normalize(state, req)),
        "proficiency.classify" => Some(handle_proficiency_classify(state, req)),
        _ => None,
    }
}
