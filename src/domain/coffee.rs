//! Coffee shop tools, resources and prompts
//!
//! A fixed catalog of three drinks, exposed as two tools (`getDrinkNames`,
//! `getDrinkInfo`), one resource (`menu://app`) and two prompt templates.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::errors::HandlerError;
use crate::mcp::types::{
    ContentItem, InputSchema, Prompt, PromptArgument, PromptHandler, PromptMessage, PromptParams,
    PromptResponse, Resource, ResourceContent, ResourceHandler, ResourceParams, ResourceResponse,
    Tool, ToolCallParams, ToolHandler, ToolResponse,
};

pub const MENU_RESOURCE_URI: &str = "menu://app";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drink {
    pub name: String,
    pub price: u32,
    pub description: String,
}

impl Drink {
    fn new(name: &str, price: u32, description: &str) -> Self {
        Self {
            name: name.to_string(),
            price,
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoffeeShop {
    drinks: Vec<Drink>,
}

impl Default for CoffeeShop {
    fn default() -> Self {
        Self::new()
    }
}

impl CoffeeShop {
    pub fn new() -> Self {
        Self {
            drinks: vec![
                Drink::new(
                    "Latte",
                    5,
                    "A latte is a coffee drink made with espresso and steamed milk.",
                ),
                Drink::new(
                    "Mocha",
                    6,
                    "A mocha is a coffee drink made with espresso and chocolate.",
                ),
                Drink::new(
                    "Flat White",
                    7,
                    "A flat white is a coffee drink made with espresso and steamed milk.",
                ),
            ],
        }
    }

    pub fn drinks(&self) -> &[Drink] {
        &self.drinks
    }

    fn drink_names(&self) -> Result<ToolResponse, HandlerError> {
        let names: Vec<&str> = self.drinks.iter().map(|drink| drink.name.as_str()).collect();
        Ok(text_response(json!({ "names": names }).to_string()))
    }

    fn drink_info(&self, arguments: &Map<String, Value>) -> Result<ToolResponse, HandlerError> {
        let name = arguments
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::invalid_argument("invalid name parameter: expected string"))?;

        let drink = self
            .drinks
            .iter()
            .find(|drink| drink.name == name)
            .ok_or_else(|| HandlerError::not_found("drink", name))?;

        let text = serde_json::to_string(drink)
            .map_err(|err| HandlerError::internal(format!("failed to encode drink info: {err}")))?;
        Ok(text_response(text))
    }

    fn menu(&self) -> Result<ResourceResponse, HandlerError> {
        let text = serde_json::to_string(&self.drinks)
            .map_err(|err| HandlerError::internal(format!("failed to encode menu: {err}")))?;

        Ok(ResourceResponse {
            contents: vec![ResourceContent {
                uri: MENU_RESOURCE_URI.to_string(),
                text,
            }],
        })
    }

    fn recommendation_prompt(&self, arguments: &Map<String, Value>) -> PromptResponse {
        let preference = arguments
            .get("preference")
            .map(|value| format!(" who prefers {} drinks", display_argument(value)))
            .unwrap_or_default();
        let budget = arguments
            .get("budget")
            .map(|value| format!(" with a budget of ${}", display_argument(value)))
            .unwrap_or_default();

        let menu = self
            .drinks
            .iter()
            .map(|drink| format!("- {} (${}): {}", drink.name, drink.price, drink.description))
            .collect::<Vec<_>>()
            .join("\n");

        user_prompt(format!(
            "You are a coffee expert at a specialty coffee shop. A customer{preference}{budget} is asking for drink recommendations.\n\n\
             Available drinks:\n{menu}\n\n\
             Please recommend the best drink(s) for this customer and explain why."
        ))
    }

    fn description_prompt(&self, arguments: &Map<String, Value>) -> PromptResponse {
        let drink_name = arguments
            .get("drink_name")
            .and_then(Value::as_str)
            .unwrap_or("coffee");

        user_prompt(format!(
            "You are a coffee expert. Please provide a detailed description of a {drink_name}, including:\n\n\
             1. The ingredients and preparation method\n\
             2. The flavor profile and tasting notes\n\
             3. The history or origin of this drink\n\
             4. Tips for enjoying it\n\n\
             Be engaging and informative in your response."
        ))
    }
}

fn text_response(text: String) -> ToolResponse {
    ToolResponse {
        content: vec![ContentItem::text(text)],
    }
}

fn user_prompt(text: String) -> PromptResponse {
    PromptResponse {
        messages: vec![PromptMessage {
            role: "user".to_string(),
            content: ContentItem::text(text),
        }],
    }
}

fn display_argument(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ToolHandler for CoffeeShop {
    async fn list_tools(&self) -> Result<Vec<Tool>, HandlerError> {
        let mut drink_info_schema = InputSchema::object();
        drink_info_schema
            .properties
            .insert("name".to_string(), json!({ "type": "string" }));
        drink_info_schema.required.push("name".to_string());

        Ok(vec![
            Tool {
                name: "getDrinkNames".to_string(),
                description: "Get the names of the drinks in the shop".to_string(),
                input_schema: InputSchema::object(),
            },
            Tool {
                name: "getDrinkInfo".to_string(),
                description: "Get more info about the drink".to_string(),
                input_schema: drink_info_schema,
            },
        ])
    }

    async fn call_tool(&self, params: ToolCallParams) -> Result<ToolResponse, HandlerError> {
        match params.name.as_str() {
            "getDrinkNames" => self.drink_names(),
            "getDrinkInfo" => self.drink_info(&params.arguments),
            other => Err(HandlerError::not_found("tool", other)),
        }
    }
}

#[async_trait]
impl ResourceHandler for CoffeeShop {
    async fn list_resources(&self) -> Result<Vec<Resource>, HandlerError> {
        Ok(vec![Resource {
            uri: MENU_RESOURCE_URI.to_string(),
            name: "menu".to_string(),
        }])
    }

    async fn read_resource(
        &self,
        params: ResourceParams,
    ) -> Result<ResourceResponse, HandlerError> {
        if params.uri == MENU_RESOURCE_URI {
            return self.menu();
        }

        Err(HandlerError::not_found("resource", params.uri))
    }
}

#[async_trait]
impl PromptHandler for CoffeeShop {
    async fn list_prompts(&self) -> Result<Vec<Prompt>, HandlerError> {
        Ok(vec![
            Prompt {
                name: "drinkRecommendation".to_string(),
                description:
                    "Get personalized drink recommendations based on budget and preferences"
                        .to_string(),
                arguments: vec![
                    PromptArgument {
                        name: "budget".to_string(),
                        description: "Customer's budget in dollars".to_string(),
                        required: false,
                    },
                    PromptArgument {
                        name: "preference".to_string(),
                        description:
                            "Customer's taste preference (e.g., 'sweet', 'strong', 'mild')"
                                .to_string(),
                        required: false,
                    },
                ],
            },
            Prompt {
                name: "drinkDescription".to_string(),
                description:
                    "Get a detailed description and information about a specific coffee drink"
                        .to_string(),
                arguments: vec![PromptArgument {
                    name: "drink_name".to_string(),
                    description: "The name of the drink to describe".to_string(),
                    required: true,
                }],
            },
        ])
    }

    async fn get_prompt(&self, params: PromptParams) -> Result<PromptResponse, HandlerError> {
        match params.name.as_str() {
            "drinkRecommendation" => Ok(self.recommendation_prompt(&params.arguments)),
            "drinkDescription" => Ok(self.description_prompt(&params.arguments)),
            other => Err(HandlerError::not_found("prompt", other)),
        }
    }
}
