use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::auth::TokenProvider;
use crate::catalog::ObjectId;
use crate::error::{Operation, SyncResult};
use crate::http::LayerClient;
use crate::observations::{Condition, ReachId};

pub const OBJECT_ID_FIELD: &str = "OBJECTID";
pub const REACH_ID_FIELD: &str = "reach_id";

/// A feature row as the service returns it, plus the writable gauge fields.
/// Geometry is never requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub attributes: FeatureAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAttributes {
    #[serde(rename = "OBJECTID")]
    pub object_id: ObjectId,
    #[serde(default, deserialize_with = "reach_id_from_json")]
    pub reach_id: Option<ReachId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gauge_observation: Option<String>,
}

impl Feature {
    #[cfg(test)]
    pub fn new(object_id: ObjectId, reach_id: impl Into<ReachId>) -> Self {
        Self {
            attributes: FeatureAttributes {
                object_id,
                reach_id: Some(reach_id.into()),
                condition: None,
                gauge_observation: None,
            },
        }
    }

    pub fn reach_id(&self) -> Option<&str> {
        self.attributes.reach_id.as_deref()
    }
}

/// Layers store `reach_id` as text or as a number depending on how they were
/// loaded; both key the same observation.
fn reach_id_from_json<'de, D>(deserializer: D) -> Result<Option<ReachId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(number_key(&n)),
        _ => None,
    })
}

/// `1001` and `1001.0` must key the same reach.
fn number_key(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct FeatureQueryResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

/// Fetches `OBJECTID` and `reach_id` for one block of object ids.
pub async fn fetch_block(
    layer: &LayerClient,
    tokens: &TokenProvider,
    object_ids: &[ObjectId],
) -> SyncResult<Vec<Feature>> {
    let ids = object_ids
        .iter()
        .map(ObjectId::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let response: FeatureQueryResponse = layer
        .request(
            tokens,
            Operation::QueryFeatures,
            Method::POST,
            "query",
            &[
                ("where", "1=1".to_string()),
                ("objectIds", ids),
                ("outFields", format!("{OBJECT_ID_FIELD},{REACH_ID_FIELD}")),
                ("returnGeometry", "false".to_string()),
                ("returnIdsOnly", "false".to_string()),
            ],
        )
        .await?;

    tracing::debug!(
        requested = object_ids.len(),
        returned = response.features.len(),
        "feature block fetched"
    );
    Ok(response.features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ServiceErrorKind, SyncError};
    use crate::testing::{layer_for, mount_token, tokens_for};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn reach_id_accepts_strings_and_numbers() {
        let features: Vec<Feature> = serde_json::from_str(
            r#"[
                {"attributes": {"OBJECTID": 1, "reach_id": "1234"}},
                {"attributes": {"OBJECTID": 2, "reach_id": 5678}},
                {"attributes": {"OBJECTID": 3, "reach_id": null}},
                {"attributes": {"OBJECTID": 4}},
                {"attributes": {"OBJECTID": 5, "reach_id": "  "}}
            ]"#,
        )
        .unwrap();
        let ids: Vec<Option<&str>> = features.iter().map(Feature::reach_id).collect();
        assert_eq!(ids, vec![Some("1234"), Some("5678"), None, None, None]);
    }

    #[test]
    fn integral_float_reach_id_matches_integer_key() {
        let features: Vec<Feature> = serde_json::from_str(
            r#"[
                {"attributes": {"OBJECTID": 1, "reach_id": 1001.0}},
                {"attributes": {"OBJECTID": 2, "reach_id": 12.5}}
            ]"#,
        )
        .unwrap();
        let ids: Vec<Option<&str>> = features.iter().map(Feature::reach_id).collect();
        assert_eq!(ids, vec![Some("1001"), Some("12.5")]);
    }

    #[test]
    fn unset_gauge_fields_are_not_serialized() {
        let json = serde_json::to_value(Feature::new(10, "A")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"attributes": {"OBJECTID": 10, "reach_id": "A"}})
        );
    }

    #[tokio::test]
    async fn fetch_block_requests_only_the_given_ids() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/FeatureServer/0/query"))
            .and(body_string_contains("objectIds=10%2C11"))
            .and(body_string_contains("outFields=OBJECTID%2Creach_id"))
            .and(body_string_contains("returnGeometry=false"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"objectIdFieldName":"OBJECTID","features":[
                    {"attributes":{"OBJECTID":10,"reach_id":"A"}},
                    {"attributes":{"OBJECTID":11,"reach_id":"B"}}
                ]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let features = fetch_block(&layer_for(&server), &tokens_for(&server), &[10, 11])
            .await
            .unwrap();
        assert_eq!(features, vec![Feature::new(10, "A"), Feature::new(11, "B")]);
    }

    #[tokio::test]
    async fn fetch_block_surfaces_error_payload() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/FeatureServer/0/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error":{"code":400,"message":"Failed to execute query.","details":[]}}"#,
            ))
            .mount(&server)
            .await;

        let err = fetch_block(&layer_for(&server), &tokens_for(&server), &[1])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Service {
                operation: Operation::QueryFeatures,
                kind: ServiceErrorKind::Payload { code: 400, .. }
            }
        ));
    }

    #[tokio::test]
    async fn hung_query_times_out() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/FeatureServer/0/query"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"features":[]}"#)
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let http = crate::http::build_client(std::time::Duration::from_millis(200)).unwrap();
        let layer = LayerClient::new(
            http,
            &format!("{}/FeatureServer/0", server.uri()),
            crate::testing::no_retry(),
        );
        let err = fetch_block(&layer, &tokens_for(&server), &[1])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Service {
                operation: Operation::QueryFeatures,
                kind: ServiceErrorKind::Timeout
            }
        ));
    }

    #[tokio::test]
    async fn expired_token_triggers_one_reauthentication() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generateToken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"tok-1"}"#))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/generateToken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"tok-2"}"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/FeatureServer/0/query"))
            .and(body_string_contains("token=tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error":{"code":498,"message":"Invalid token.","details":[]}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/FeatureServer/0/query"))
            .and(body_string_contains("token=tok-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"features":[{"attributes":{"OBJECTID":7,"reach_id":"R7"}}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let features = fetch_block(&layer_for(&server), &tokens_for(&server), &[7])
            .await
            .unwrap();
        assert_eq!(features, vec![Feature::new(7, "R7")]);
    }

    #[tokio::test]
    async fn second_token_rejection_is_auth_error() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/FeatureServer/0/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error":{"code":498,"message":"Invalid token.","details":[]}}"#,
            ))
            .expect(2)
            .mount(&server)
            .await;

        let err = fetch_block(&layer_for(&server), &tokens_for(&server), &[7])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Auth { .. }));
    }
}
