use crate::core::error::PipelineError;
use crate::core::events::{ChangeAction, EventBus};
use crate::services::backend::{CharacterDraft, DescriptionRequest, GenerationBackend, ImageRequest};
use crate::utils::media::strip_data_url_header;
use crate::utils::normalize::{DescriptionResponse, ImageResponse};
use log::info;
use serde_json::Value;
use std::sync::Arc;

const DESCRIPTION_SCHEMA: &str = "Return ONLY plain text in this exact multi-line schema (one key per line, in this order), with no bullets and no Markdown:\n\
Style: <art direction; e.g., Animated colorful, painterly, semi-realistic>\n\
Age: <number> years old\n\
Gender: <Male | Female | Nonbinary | Other>\n\
Build: <body type details; e.g., lean, wiry; include agility/stamina cues if relevant>\n\
Hair: <length, style, and color; e.g., short, tousled, sun-bleached brown>\n\
Eyes: <color and quality; e.g., bright hazel, intelligent>\n\
Skin: <tone and characteristics; e.g., tanned with light freckles>\n\
Clothing: <top, outerwear, bottoms, footwear; materials, colors, wear>\n\
Accessories: <comma-separated gear; e.g., worn leather explorer hat tilted back; small compass on leather cord>\n\
Expression: <facial mood; e.g., eager, determined with exuberance>\n\
Pose: <succinct pose; e.g., mid-stride, leaning, hands-on-hips>\n\
Additional details: <optional concise details that enrich the character only; avoid background scene>\n\
\n\
Strict formatting rules:\n\
- Use exactly these keys and order.\n\
- Use the pattern 'Key: value' on each line.\n\
- No headings, no bullets, no Markdown, no asterisks, no bold.\n\
- Be vivid and specific (materials, textures, colors), but keep each value to a single line.";

const PORTRAIT_INSTRUCTION: &str = "Generate a character image in png format in 4k resolution with transparent background based on the following character description";

pub fn compose_description_prompt(user_prompt: &str) -> String {
    format!("{}\n\nUser prompt: {}", DESCRIPTION_SCHEMA, user_prompt)
}

pub fn compose_portrait_prompt(description: &str) -> String {
    format!("{} {}", PORTRAIT_INSTRUCTION, description)
}

/// A character being put together before it is saved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterForm {
    pub name: String,
    pub description: String,
    /// Data URL of the portrait, if any.
    pub image: Option<String>,
}

impl CharacterForm {
    pub fn to_draft(&self) -> CharacterDraft {
        CharacterDraft {
            name: self.name.trim().to_string(),
            description: self.description.clone(),
            image: self
                .image
                .as_deref()
                .map(|img| strip_data_url_header(img).to_string())
                .filter(|img| !img.is_empty()),
        }
    }
}

/// Description and portrait generation plus character saving. Runs beside
/// the script/video pipeline and never touches its state; calls take `&self`
/// so a description and a portrait can be generated at the same time.
pub struct CharacterStudio {
    backend: Arc<dyn GenerationBackend>,
    events: EventBus,
}

impl CharacterStudio {
    pub fn new(backend: Arc<dyn GenerationBackend>, events: EventBus) -> Self {
        Self { backend, events }
    }

    pub async fn generate_description(&self, prompt: &str) -> Result<String, PipelineError> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::validation("Please enter a description prompt."));
        }
        info!("Generating description...");
        let request = DescriptionRequest::new(compose_description_prompt(prompt));
        let response = self.backend.generate_description(&request).await?;
        DescriptionResponse::classify(&response).into_description()
    }

    pub async fn generate_image(&self, prompt: &str) -> Result<String, PipelineError> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::validation("Please enter an image prompt."));
        }
        self.request_image(prompt.to_string()).await
    }

    pub async fn generate_image_from_description(
        &self,
        description: &str,
    ) -> Result<String, PipelineError> {
        if description.trim().is_empty() {
            return Err(PipelineError::validation(
                "Description is empty. Enter a description or generate one first.",
            ));
        }
        self.request_image(compose_portrait_prompt(description)).await
    }

    async fn request_image(&self, prompt: String) -> Result<String, PipelineError> {
        info!("Generating image...");
        let response = self.backend.generate_image(&ImageRequest { prompt }).await?;
        let classified = ImageResponse::classify(&response);
        if let ImageResponse::Found { field, .. } = &classified {
            log::debug!("Image payload found under '{}'", field);
        }
        classified.into_payload()
    }

    pub async fn save(&self, form: &CharacterForm) -> Result<Value, PipelineError> {
        let draft = form.to_draft();
        if draft.name.is_empty() {
            return Err(PipelineError::validation("Enter a character name."));
        }
        let saved = self.backend.create_character(&draft).await?;
        info!("Saved character {}", draft.name);
        self.events.characters_changed(ChangeAction::Created);
        Ok(saved)
    }

    pub async fn delete(&self, id: &str) -> Result<(), PipelineError> {
        self.backend.delete_character(id).await?;
        info!("Deleted character {}", id);
        self.events.characters_changed(ChangeAction::Deleted);
        Ok(())
    }
}
