use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::error::GenerationError;
use crate::types::{EvaluationScenario, ScenarioResult, StudentState};

pub const GENERATION_FAILURE_MESSAGE: &str = "Không thể tạo đề xuất can thiệp do lỗi hệ thống.";

pub const SYSTEM_PROMPT: &str = "You are an educational AI assistant that gives programming students \
detailed, easy to follow error analysis and improvement suggestions in Vietnamese.";

pub const EVALUATION_SCENARIOS: [EvaluationScenario; 3] = [
    EvaluationScenario {
        name: "At-risk student",
        gpa: 1.8,
        progress_rate: 20.0,
        bloom_score: 3.0,
        num_submissions: 2,
        num_errors: 5,
        errors: &[
            "Lỗi hàm: Truyền tham số không đúng kiểu",
            "Lỗi cú pháp: Sai định dạng printf",
        ],
    },
    EvaluationScenario {
        name: "Average student",
        gpa: 3.0,
        progress_rate: 60.0,
        bloom_score: 6.0,
        num_submissions: 6,
        num_errors: 2,
        errors: &["Lỗi logic: Sai điều kiện if"],
    },
    EvaluationScenario {
        name: "Excellent student",
        gpa: 3.8,
        progress_rate: 90.0,
        bloom_score: 9.0,
        num_submissions: 10,
        num_errors: 0,
        errors: &[],
    },
];

pub const ACTUAL_SCENARIO_NAME: &str = "Actual";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    #[default]
    Markdown,
    Narrative,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 30,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub gpa: f64,
    pub progress_rate: f64,
    pub bloom_score: f64,
    pub num_submissions: u32,
    pub error_count: u32,
    pub error_messages: Vec<String>,
    pub common_error_types: Vec<String>,
}

impl PromptContext {
    pub fn from_state(state: &StudentState, error_messages: &[String], common_error_types: &[String]) -> Self {
        Self {
            gpa: state.gpa,
            progress_rate: state.progress_rate,
            bloom_score: state.bloom_score,
            num_submissions: state.num_submissions,
            error_count: state.error_count,
            error_messages: error_messages.to_vec(),
            common_error_types: common_error_types.to_vec(),
        }
    }

    pub fn from_scenario(scenario: &EvaluationScenario) -> Self {
        Self {
            gpa: scenario.gpa,
            progress_rate: scenario.progress_rate,
            bloom_score: scenario.bloom_score,
            num_submissions: scenario.num_submissions,
            error_count: scenario.num_errors,
            error_messages: scenario.errors.iter().map(|e| e.to_string()).collect(),
            common_error_types: Vec::new(),
        }
    }
}

pub fn build_prompt(style: PromptStyle, context: &PromptContext) -> String {
    let errors = if context.error_messages.is_empty() {
        "None: no specific errors or warnings".to_string()
    } else {
        context
            .error_messages
            .iter()
            .map(|e| format!("- {}", e))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let common = if context.common_error_types.is_empty() {
        "None".to_string()
    } else {
        context.common_error_types.join(", ")
    };

    let profile = format!(
        "Student information:\n\
         - GPA: {}\n\
         - Progress rate: {}%\n\
         - Bloom score: {}\n\
         - Submissions: {}\n\
         - Recorded errors: {}\n\n\
         ## All errors and warnings of this student (analyze every one):\n{}\n\n\
         ## Common errors in the course (reference only, relate when relevant):\n{}\n",
        context.gpa,
        context.progress_rate,
        context.bloom_score,
        context.num_submissions,
        context.error_count,
        errors,
        common
    );

    let instructions = match style {
        PromptStyle::Markdown => MARKDOWN_INSTRUCTIONS,
        PromptStyle::Narrative => NARRATIVE_INSTRUCTIONS,
    };

    format!("{}\n---\n{}", profile, instructions)
}

const MARKDOWN_INSTRUCTIONS: &str = r#"Requirements:
1. Analyze every error and warning listed above. Do not skip any.
2. Use exactly this markdown layout for each one:

## Error [number]: [error name]
### 1. Error analysis
- Description: [when the error happens and how it shows, at most 3 sentences]
- Cause: [why the student made it, at most 2 sentences]
### 2. Improvement suggestions
- Fix: [concrete steps, at most 4 sentences]
- Example:
```c
[code showing the fix, C/C++ unless the error belongs to another language]
```

3. If there are no specific errors or warnings, give general advice instead:
## General improvement suggestions
- Description: [current situation based on GPA, progress and Bloom score]
- Suggestions: [concrete advice such as debugging practice or reading documentation]

Answer in Vietnamese but keep the headings above exactly as written."#;

const NARRATIVE_INSTRUCTIONS: &str = r#"Speak as a friendly senior mentor talking to the student directly.
Start with a short encouraging greeting, then for every error or warning listed above write one block:

🔍 To explain [error name]
📌 Error: [what went wrong, in plain words]
🧠 Cause: [why it probably happened]
🛠️ Fix: [step by step fix]
💻 Example: [short C/C++ snippet showing the fix]

If there are no specific errors, skip the blocks and end with:
## General improvement suggestions
[general advice based on GPA, progress and Bloom score]

Answer in Vietnamese but keep the emoji markers above exactly as written."#;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerationError>;
}

pub struct OpenAiGenerator {
    config: LlmConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: LlmConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerationError> {
        if self.config.api_key.is_empty() {
            return Err(GenerationError::NotConfigured("API key not set".to_string()));
        }

        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!("Calling chat completions at {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

pub struct RecommendationGenerator {
    generator: Arc<dyn TextGenerator>,
    style: PromptStyle,
}

impl RecommendationGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, style: PromptStyle) -> Self {
        Self { generator, style }
    }

    pub fn style(&self) -> PromptStyle {
        self.style
    }

    pub async fn generate_intervention_text(
        &self,
        state: &StudentState,
        error_messages: &[String],
        common_error_types: &[String],
    ) -> String {
        let context = PromptContext::from_state(state, error_messages, common_error_types);
        self.generate_for(&context).await
    }

    pub async fn evaluate_scenarios(&self, scenarios: &[EvaluationScenario]) -> Vec<ScenarioResult> {
        let mut results = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            let recommendation = self.generate_for(&PromptContext::from_scenario(scenario)).await;
            results.push(ScenarioResult {
                scenario: scenario.name.to_string(),
                recommendation,
            });
        }
        results
    }

    async fn generate_for(&self, context: &PromptContext) -> String {
        let prompt = build_prompt(self.style, context);
        let start = Instant::now();

        let result = self.generator.generate(SYSTEM_PROMPT, &prompt).await;
        metrics::histogram!("llm_request_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(text) => {
                info!("Generated {} chars of recommendation text", text.len());
                text
            }
            Err(e) => {
                error!("Text generation failed: {}", e);
                metrics::counter!("llm_failures_total").increment(1);
                GENERATION_FAILURE_MESSAGE.to_string()
            }
        }
    }
}
