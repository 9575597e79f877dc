//! Translation pipeline
//!
//! Executes a conversion chain against a JSON payload (sync) or a framed
//! stream of JSON chunks. Chains come from the flavor registry; the steps
//! are interpreted here and the expressions are evaluated by [`jsonata`].

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde_json::Value;

pub mod jsonata;

use crate::errors::{AogError, AogResult};
use crate::flavor::{Chain, ConverterStep, StepAction};

/// Result of running a chain over one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Value(Value),
    /// An `action_if` step dropped the frame; it must not be forwarded
    Dropped,
}

/// Run `chain` over `payload`, mutating the ambient `headers` map.
pub fn run_chain(
    chain: &Chain,
    payload: Value,
    headers: &mut HashMap<String, String>,
) -> AogResult<ChainOutcome> {
    let mut current = payload;
    for step in &chain.steps {
        match step {
            ConverterStep::Jsonata { expression } => {
                let result = jsonata::evaluate(expression, &current)
                    .map_err(|e| AogError::translation(e.to_string()))?;
                current = result.unwrap_or(Value::Null);
            }
            ConverterStep::Header { set, remove } => {
                for (name, value) in set {
                    headers.insert(name.clone(), value.clone());
                }
                for name in remove {
                    headers.remove(name);
                }
            }
            ConverterStep::ActionIf {
                pattern,
                trim,
                action,
            } => {
                if payload_matches(&current, pattern, *trim) {
                    match action {
                        StepAction::Drop => return Ok(ChainOutcome::Dropped),
                        StepAction::Keep => return Ok(ChainOutcome::Value(current)),
                    }
                }
            }
        }
    }
    Ok(ChainOutcome::Value(current))
}

/// Literal pattern match for `action_if`: string frames compare directly,
/// structured frames compare by their compact serialization.
fn payload_matches(payload: &Value, pattern: &str, trim: bool) -> bool {
    let text = match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if trim {
        text.trim() == pattern.trim()
    } else {
        text == pattern
    }
}

/// Apply a `stream_response_*` chain to a framed stream.
///
/// Chunks keep their upstream order, dropped chunks are omitted, and the
/// chain's epilogue frames are appended after upstream closes. A converter
/// failure surfaces one `ErrTranslation` frame and ends the stream without
/// the epilogue.
pub fn translate_stream<S>(
    chain: Arc<Chain>,
    upstream: S,
) -> impl Stream<Item = AogResult<Value>> + Send
where
    S: Stream<Item = AogResult<Value>> + Send + Unpin + 'static,
{
    async_stream::stream! {
        let mut upstream = upstream;
        let mut headers = HashMap::new();
        let mut errored = false;

        while let Some(frame) = upstream.next().await {
            match frame {
                Ok(value) => match run_chain(&chain, value, &mut headers) {
                    Ok(ChainOutcome::Value(translated)) => yield Ok(translated),
                    Ok(ChainOutcome::Dropped) => {}
                    Err(error) => {
                        errored = true;
                        yield Err(error);
                        break;
                    }
                },
                Err(error) => {
                    errored = true;
                    yield Err(error);
                    break;
                }
            }
        }

        if !errored {
            for frame in &chain.epilogue {
                yield Ok(frame.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flavor::FlavorDocument;
    use serde_json::json;

    fn chain_from_yaml(yaml: &str) -> Chain {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn jsonata_step_replaces_payload() {
        let chain = chain_from_yaml(
            r#"
steps:
  - kind: jsonata
    expression: '{"model": model, "prompt": messages[0].content}'
"#,
        );
        let mut headers = HashMap::new();
        let out = run_chain(
            &chain,
            json!({"model": "m", "messages": [{"content": "hi"}]}),
            &mut headers,
        )
        .unwrap();
        assert_eq!(out, ChainOutcome::Value(json!({"model": "m", "prompt": "hi"})));
    }

    #[test]
    fn header_step_mutates_ambient_map() {
        let chain = chain_from_yaml(
            r#"
steps:
  - kind: header
    set:
      Content-Type: application/json
    remove:
      - X-Stale
"#,
        );
        let mut headers = HashMap::from([("X-Stale".to_string(), "1".to_string())]);
        run_chain(&chain, json!({}), &mut headers).unwrap();
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
        assert!(!headers.contains_key("X-Stale"));
    }

    #[test]
    fn action_if_drop_discards_frame() {
        let chain = chain_from_yaml(
            r#"
steps:
  - kind: action_if
    pattern: "[DONE]"
    trim: true
    action: drop
"#,
        );
        let mut headers = HashMap::new();
        assert_eq!(
            run_chain(&chain, json!("  [DONE]  "), &mut headers).unwrap(),
            ChainOutcome::Dropped
        );
        assert_eq!(
            run_chain(&chain, json!({"delta": "x"}), &mut headers).unwrap(),
            ChainOutcome::Value(json!({"delta": "x"}))
        );
    }

    #[tokio::test]
    async fn stream_preserves_order_and_appends_epilogue() {
        let chain: Chain = chain_from_yaml(
            r#"
steps:
  - kind: action_if
    pattern: "[DONE]"
    trim: true
    action: drop
  - kind: jsonata
    expression: '{"content": delta}'
epilogue:
  - "[DONE]"
"#,
        );
        let upstream = futures_util::stream::iter(vec![
            Ok(json!({"delta": "a"})),
            Ok(json!("[DONE]")),
            Ok(json!({"delta": "b"})),
        ]);
        let frames: Vec<_> = translate_stream(Arc::new(chain), upstream)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            frames,
            vec![
                json!({"content": "a"}),
                json!({"content": "b"}),
                json!("[DONE]"),
            ]
        );
    }

    #[tokio::test]
    async fn converter_error_surfaces_translation_frame_without_epilogue() {
        let chain: Chain = chain_from_yaml(
            r#"
steps:
  - kind: jsonata
    expression: '$nosuchfn(delta)'
epilogue:
  - "[DONE]"
"#,
        );
        let upstream = futures_util::stream::iter(vec![Ok(json!({"delta": "a"}))]);
        let frames: Vec<_> = translate_stream(Arc::new(chain), upstream)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Err(AogError::Translation { .. })));
    }

    #[test]
    fn round_trip_identity_on_referenced_fields() {
        // to_aog then from_aog over a payload produced by the same flavor is
        // the identity on the fields the chains reference.
        let doc: FlavorDocument = serde_yaml::from_str(
            r#"
flavor: test
services:
  chat:
    request_to_aog:
      steps:
        - kind: jsonata
          expression: '{"model": model, "messages": messages, "stream": stream}'
    request_from_aog:
      steps:
        - kind: jsonata
          expression: '{"model": model, "messages": messages, "stream": stream}'
"#,
        )
        .unwrap();
        let template = &doc.services["chat"];
        let payload = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hello"}],
            "stream": true,
        });
        let mut headers = HashMap::new();
        let ChainOutcome::Value(aog) =
            run_chain(&template.request_to_aog, payload.clone(), &mut headers).unwrap()
        else {
            panic!("dropped");
        };
        let ChainOutcome::Value(back) =
            run_chain(&template.request_from_aog, aog, &mut headers).unwrap()
        else {
            panic!("dropped");
        };
        assert_eq!(back, payload);
    }
}
