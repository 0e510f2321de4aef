//! Product categorization.
//!
//! Keyword rules always work offline. When an AI API key is configured, an
//! OpenAI-compatible chat completion is asked first and any failure or
//! off-list answer falls back to the keyword rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AiConfig;

pub const CATEGORIES: &[&str] = &[
    "Electronics",
    "Clothing",
    "Home & Garden",
    "Sports",
    "Books",
    "Toys",
    "Food & Beverage",
    "Health & Beauty",
    "Automotive",
    "Other",
];

/// Keywords per category, checked in order so earlier categories win ties
/// (`coffee maker` is Home & Garden, not Food & Beverage).
const KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Electronics",
        &[
            "phone", "smartphone", "iphone", "laptop", "notebook", "tablet", "ipad", "headphone",
            "headphones", "earbuds", "tv", "television", "camera", "charger", "monitor",
            "speaker", "keyboard", "mouse", "console", "playstation", "xbox", "smartwatch", "ssd",
            "router", "gpu", "cpu",
        ],
    ),
    (
        "Home & Garden",
        &[
            "coffee maker", "espresso machine", "lamp", "sofa", "chair", "table", "desk",
            "kitchen", "cookware", "garden", "bed", "mattress", "pillow", "vacuum", "blender",
            "kettle", "curtain", "rug", "drill",
        ],
    ),
    (
        "Clothing",
        &[
            "shirt", "t-shirt", "jeans", "dress", "jacket", "coat", "shoe", "shoes", "sneaker",
            "sneakers", "boot", "boots", "hoodie", "sweater", "sock", "socks", "trousers", "skirt",
        ],
    ),
    (
        "Sports",
        &[
            "bike", "bicycle", "yoga", "fitness", "dumbbell", "tennis", "football", "basketball",
            "treadmill", "golf", "camping", "tent",
        ],
    ),
    (
        "Books",
        &["book", "novel", "hardcover", "paperback", "kindle edition"],
    ),
    (
        "Toys",
        &["toy", "lego", "puzzle", "doll", "board game", "action figure", "plush"],
    ),
    (
        "Food & Beverage",
        &["coffee", "tea", "chocolate", "snack", "wine", "beer", "juice", "cereal"],
    ),
    (
        "Health & Beauty",
        &[
            "shampoo", "conditioner", "cream", "serum", "vitamin", "perfume", "makeup",
            "lipstick", "toothbrush", "sunscreen",
        ],
    ),
    (
        "Automotive",
        &["car", "tire", "tyre", "motor oil", "dash cam", "wiper", "brake"],
    ),
];

/// Assigns products to one of [`CATEGORIES`].
pub struct Categorizer {
    ai: Option<AiClient>,
}

struct AiClient {
    client: reqwest::Client,
    config: AiConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl Categorizer {
    /// Keyword rules only.
    pub fn keywords_only() -> Self {
        Self { ai: None }
    }

    /// Use the AI endpoint when configured, else keyword rules only.
    pub fn new(ai: Option<AiConfig>) -> Self {
        let ai = ai.and_then(|config| {
            match reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
            {
                Ok(client) => Some(AiClient { client, config }),
                Err(e) => {
                    tracing::warn!("AI categorization disabled, client build failed: {}", e);
                    None
                }
            }
        });
        Self { ai }
    }

    pub async fn categorize(&self, name: &str, description: Option<&str>) -> String {
        if let Some(ai) = &self.ai {
            match ai.categorize(name).await {
                Ok(Some(category)) => return category,
                Ok(None) => tracing::debug!(%name, "AI returned an unknown category"),
                Err(e) => tracing::warn!("AI categorization failed: {}", e),
            }
        }
        keyword_category(name, description).to_string()
    }
}

impl AiClient {
    async fn categorize(&self, name: &str) -> Result<Option<String>, reqwest::Error> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: format!(
                        "You are a product categorization assistant. Categorize products into one of these categories: {}. Respond with only the category name.",
                        CATEGORIES.join(", ")
                    ),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!("Categorize this product: {}", name),
                },
            ],
            max_tokens: 20,
            temperature: 0.3,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response: ChatResponse = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .choices
            .first()
            .and_then(|c| match_category(&c.message.content)))
    }
}

/// Map a free-form answer onto a known category name.
fn match_category(answer: &str) -> Option<String> {
    let answer = answer.trim().trim_end_matches('.').to_lowercase();
    CATEGORIES
        .iter()
        .find(|c| c.to_lowercase() == answer)
        .map(|c| c.to_string())
}

/// Category from keyword rules over the name, then the description.
pub fn keyword_category(name: &str, description: Option<&str>) -> &'static str {
    for text in std::iter::once(name).chain(description) {
        let padded = format!(" {} ", normalize_words(text));
        for &(category, words) in KEYWORDS {
            if words
                .iter()
                .any(|w| padded.contains(&format!(" {} ", w)) || padded.contains(&format!(" {}s ", w)))
            {
                return category;
            }
        }
    }
    "Other"
}

/// Lowercase and replace everything but letters, digits and hyphens with spaces.
fn normalize_words(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
