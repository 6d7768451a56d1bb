use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ContainmentEdge, Item};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";

const ORACLE_TEMPERATURE: f64 = 0.3;
const SYSTEM_PROMPT: &str =
    "You are a pharmaceutical packaging expert. Return only valid JSON.";

const PROMPT_PREAMBLE: &str = "You are a pharmaceutical packaging expert. For each drug listed below, determine the packaging hierarchy - specifically how many smaller units fit into each larger unit.

For each drug, I'll provide:
- Its number in this batch
- Drug name
- Available units (from largest to smallest container)

Please return a JSON array with the packaging structure for each drug. Use standard pharmaceutical packaging conventions.

**Important Notes:**
- Container typically means a bottle/jar
- Pack usually contains multiple cards/blister packs
- Card/Blister typically contains individual tablets/capsules
- Use realistic pharmaceutical standards (e.g., packs often contain 10 cards, cards often contain 10 tablets)
- If a drug only has one unit type (e.g., just \"Tablet\"), return an empty array for packagingStructure

**Drugs to analyze:**

";

const PROMPT_RETURN_FORMAT: &str = "
**Return format (JSON):**
```json
[
  {
    \"index\": 0,
    \"name\": \"Drug Name\",
    \"packagingStructure\": [
      { \"unit\": \"Pack\", \"contains\": 10, \"of\": \"Card\" },
      { \"unit\": \"Card\", \"contains\": 10, \"of\": \"Tablet\" }
    ]
  },
  ...
]
```

`index` is the item's number in this batch. Return ONLY the JSON array, no additional text.";

/// Transport failures cover the network and non-success HTTP statuses;
/// format failures cover every way a response body can fail to decode into
/// batch results.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport failed: {0}")]
    Transport(String),
    #[error("oracle response malformed: {0}")]
    Format(String),
}

/// One row of a parsed oracle response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleResult {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub packaging_structure: Option<Vec<ContainmentEdge>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMatch {
    MatchedByName { slot: usize },
    MatchedByPosition { slot: usize },
    Unmatched,
}

/// Resolves a result row to a slot within the batch: exact name lookup
/// first, then the echoed batch position if it is in bounds.
pub fn match_result(batch_names: &[String], result: &OracleResult) -> ResultMatch {
    if let Some(name) = &result.name {
        if let Some(slot) = batch_names.iter().position(|candidate| candidate == name) {
            return ResultMatch::MatchedByName { slot };
        }
    }

    if let Some(index) = result.index {
        if index < batch_names.len() {
            return ResultMatch::MatchedByPosition { slot: index };
        }
    }

    ResultMatch::Unmatched
}

/// Renders the oracle request for one batch. Items are numbered by their
/// position within the batch, the same coordinate `match_result` accepts
/// back, and only names and unit names are sent; on-hand quantities never
/// leave the process.
pub fn render_prompt(batch_items: &[&Item]) -> String {
    let mut prompt = String::from(PROMPT_PREAMBLE);

    for (position, item) in batch_items.iter().enumerate() {
        let unit_names: Vec<&str> = item.units.iter().map(|unit| unit.name.as_str()).collect();
        prompt.push_str(&format!("{position}. {}\n", item.name));
        prompt.push_str(&format!("   Units: {}\n\n", unit_names.join(" -> ")));
    }

    prompt.push_str(PROMPT_RETURN_FORMAT);
    prompt
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();

    for opener in ["```json", "```"] {
        if let Some(start) = trimmed.find(opener) {
            let rest = &trimmed[start + opener.len()..];
            return match rest.find("```") {
                Some(end) => rest[..end].trim(),
                None => rest.trim(),
            };
        }
    }

    trimmed
}

/// Decodes one oracle response into result rows. Accepted envelopes, in
/// order: an optional markdown fence around the payload, then a bare JSON
/// array, then an object carrying the array under `drugs` or `items`.
pub fn parse_response(raw: &str) -> Result<Vec<OracleResult>, OracleError> {
    let body = strip_fence(raw);

    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|source| OracleError::Format(format!("response is not valid JSON: {source}")))?;

    let rows = match value {
        serde_json::Value::Array(rows) => rows,
        serde_json::Value::Object(mut fields) => {
            let nested = ["drugs", "items"].iter().find_map(|key| {
                matches!(fields.get(*key), Some(serde_json::Value::Array(_)))
                    .then(|| fields.remove(*key))
            });
            match nested {
                Some(Some(serde_json::Value::Array(rows))) => rows,
                _ => {
                    return Err(OracleError::Format(
                        "response carries neither a result array nor a drugs/items field"
                            .to_string(),
                    ));
                }
            }
        }
        _ => {
            return Err(OracleError::Format(
                "response is neither a JSON array nor an object".to_string(),
            ));
        }
    };

    rows.into_iter()
        .enumerate()
        .map(|(row, value)| {
            serde_json::from_value(value)
                .map_err(|source| OracleError::Format(format!("result row {row}: {source}")))
        })
        .collect()
}

/// Answers one batch prompt with raw response text.
pub trait Oracle {
    fn ask(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Oracle backed by an OpenAI-compatible chat-completions endpoint. The
/// client sets no request timeout: a run interrupted by a hung call is
/// resumed from its checkpoint rather than aborted mid-flight.
pub struct ChatOracle {
    client: Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl ChatOracle {
    pub fn new(api_url: &str, model: &str, api_key: &str) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(None)
            .build()
            .map_err(|source| OracleError::Transport(source.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl Oracle for ChatOracle {
    fn ask(&self, prompt: &str) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: ORACLE_TEMPERATURE,
            response_format: ResponseFormat {
                format: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|source| OracleError::Transport(source.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OracleError::Transport(format!(
                "oracle endpoint returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|source| OracleError::Format(source.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| OracleError::Format("chat response carried no choices".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}
