use crate::core::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::core::events::EventBus;
use crate::core::state::{Attachment, Character, Clip, ScriptRow, Selection, SelectionOutcome};
use crate::services::backend::{
    GenerationBackend, ImageFetcher, ScriptCharacter, ScriptRequest, VideoRequest,
};
use crate::services::resolver::build_char_image_map;
use crate::services::script::{self, build_enriched_characters, build_script_chunks};
use crate::utils::normalize::{normalize_character_listing, normalize_clips, normalize_script_response};
use log::{debug, info, warn};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ScriptRequested { run: u64 },
    ScriptReady,
    VideoRequested { run: u64 },
    ClipsReady,
}

impl PipelineState {
    pub fn outstanding_run(&self) -> Option<u64> {
        match self {
            Self::ScriptRequested { run } | Self::VideoRequested { run } => Some(*run),
            _ => None,
        }
    }
}

/// Which panels are open. Only presentation, never data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewState {
    pub prompt_collapsed: bool,
    pub script_expanded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// A newer request superseded this one; the response was dropped.
    Stale,
}

#[derive(Debug, Clone)]
pub struct ScriptTicket {
    pub run: u64,
    pub request: ScriptRequest,
}

#[derive(Debug, Clone)]
pub struct VideoTicket {
    pub run: u64,
    pub request: VideoRequest,
}

pub struct PipelineController {
    config: PipelineConfig,
    events: EventBus,
    catalog: Vec<Character>,
    selection: Selection,
    prompt: String,
    start_image: Option<Attachment>,
    rows: Vec<ScriptRow>,
    clips: Vec<Clip>,
    state: PipelineState,
    view: ViewState,
    last_error: Option<String>,
    next_run: u64,
}

impl PipelineController {
    pub fn new(config: PipelineConfig, events: EventBus) -> Self {
        Self {
            selection: Selection::new(config.max_selected),
            config,
            events,
            catalog: Vec::new(),
            prompt: String::new(),
            start_image: None,
            rows: Vec::new(),
            clips: Vec::new(),
            state: PipelineState::Idle,
            view: ViewState::default(),
            last_error: None,
            next_run: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn catalog(&self) -> &[Character] {
        &self.catalog
    }

    pub fn rows(&self) -> &[ScriptRow] {
        &self.rows
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn start_image(&self) -> Option<&Attachment> {
        self.start_image.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.state.outstanding_run().is_some()
    }

    fn settled_state(&self) -> PipelineState {
        if self.rows.is_empty() {
            PipelineState::Idle
        } else if self.clips.is_empty() {
            PipelineState::ScriptReady
        } else {
            PipelineState::ClipsReady
        }
    }

    fn issue_run(&mut self) -> u64 {
        self.next_run += 1;
        self.next_run
    }

    // --- Catalog & selection ---

    /// Replaces the catalog. Selected keys that no longer exist are dropped.
    pub fn set_catalog(&mut self, characters: Vec<Character>) {
        self.catalog = characters;
        let catalog = &self.catalog;
        self.selection
            .retain(|key| catalog.iter().any(|c| &c.selection_key() == key));
    }

    pub async fn refresh_catalog(
        &mut self,
        backend: &dyn GenerationBackend,
    ) -> Result<usize, PipelineError> {
        let listing = backend.list_characters().await?;
        let characters = normalize_character_listing(listing, backend.base_url());
        info!("Loaded {} characters", characters.len());
        self.set_catalog(characters);
        Ok(self.catalog.len())
    }

    pub fn is_selected(&self, key: &str) -> bool {
        self.selection.contains(key)
    }

    /// Selected characters in the order they were picked.
    pub fn selected_characters(&self) -> Vec<Character> {
        self.selection
            .keys()
            .iter()
            .filter_map(|key| self.catalog.iter().find(|c| &c.selection_key() == key))
            .cloned()
            .collect()
    }

    pub fn toggle_selection(&mut self, key: &str) -> Result<SelectionOutcome, PipelineError> {
        if self.selection.contains(key) {
            return Ok(self.selection.toggle(key));
        }
        let character = self
            .catalog
            .iter()
            .find(|c| c.selection_key() == key)
            .ok_or_else(|| PipelineError::validation(format!("Unknown character '{}'", key)))?;

        let name_key = character.name_key();
        if !name_key.is_empty()
            && self
                .selected_characters()
                .iter()
                .any(|c| c.name_key() == name_key)
        {
            self.events.notify(format!(
                "A character named {} is already selected",
                character.display_name().trim()
            ));
            return Ok(SelectionOutcome::DuplicateName);
        }

        let outcome = self.selection.toggle(key);
        if outcome == SelectionOutcome::LimitReached {
            self.events.notify(format!(
                "You can select up to {} characters",
                self.selection.max()
            ));
        }
        Ok(outcome)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // --- Prompt ---

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn attach_start_image(&mut self, image: Attachment) {
        self.start_image = Some(image);
    }

    pub fn clear_start_image(&mut self) {
        self.start_image = None;
    }

    /// Reopens the prompt panel after a script was generated.
    pub fn edit_prompt(&mut self) {
        self.view = ViewState::default();
    }

    // --- Script generation ---

    pub fn begin_script_request(&mut self) -> Result<ScriptTicket, PipelineError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() && self.start_image.is_none() {
            return Err(PipelineError::validation(
                "Add a prompt or an image to start from.",
            ));
        }

        let request = ScriptRequest {
            prompt: prompt.to_string(),
            characters: self
                .selected_characters()
                .into_iter()
                .map(|c| ScriptCharacter {
                    name: c.name,
                    description: c.description,
                })
                .collect(),
            file: self.start_image.clone(),
        };

        if let Some(previous) = self.state.outstanding_run() {
            debug!("Run {} superseded by a new script request", previous);
        }
        let run = self.issue_run();
        self.state = PipelineState::ScriptRequested { run };
        info!("Generating script (run {})...", run);
        Ok(ScriptTicket { run, request })
    }

    pub fn complete_script(
        &mut self,
        ticket: ScriptTicket,
        result: Result<Value, PipelineError>,
    ) -> Result<Completion, PipelineError> {
        if self.state != (PipelineState::ScriptRequested { run: ticket.run }) {
            debug!("Dropping stale script response (run {})", ticket.run);
            return Ok(Completion::Stale);
        }

        match result {
            Ok(value) => {
                self.rows = normalize_script_response(value);
                self.clips.clear();
                self.last_error = None;
                self.state = PipelineState::ScriptReady;
                self.view = ViewState {
                    prompt_collapsed: true,
                    script_expanded: true,
                };
                info!("Script ready with {} rows", self.rows.len());
                Ok(Completion::Applied)
            }
            Err(e) => self.fail(e),
        }
    }

    pub async fn generate_script(
        &mut self,
        backend: &dyn GenerationBackend,
    ) -> Result<Completion, PipelineError> {
        let ticket = self.begin_script_request()?;
        let result = backend.generate_script(&ticket.request).await;
        self.complete_script(ticket, result)
    }

    // --- Video generation ---

    /// Checks the guards, resolves every selected character image in one
    /// batch, then assembles the request.
    pub async fn begin_video_request(
        &mut self,
        fetcher: &dyn ImageFetcher,
        base_url: &str,
    ) -> Result<VideoTicket, PipelineError> {
        if self.selection.is_empty() {
            return Err(PipelineError::validation(
                "Select at least one character to generate a video.",
            ));
        }
        if self.rows.is_empty() {
            return Err(PipelineError::validation("Generate a script first."));
        }
        if self.is_busy() {
            return Err(PipelineError::Busy);
        }

        let selected = self.selected_characters();
        let images =
            build_char_image_map(fetcher, base_url, &selected, self.config.fetch_concurrency).await;
        let request = VideoRequest {
            script: build_script_chunks(
                &self.rows,
                &selected,
                &images,
                &self.config.default_chunk_time,
            ),
            first_frame: self.start_image.as_ref().map(|img| img.data_url.clone()),
            characters: build_enriched_characters(&selected, &images),
            model: self.config.video_model.clone(),
        };

        let run = self.issue_run();
        self.state = PipelineState::VideoRequested { run };
        info!(
            "Generating video from {} chunks (run {})...",
            request.script.len(),
            run
        );
        Ok(VideoTicket { run, request })
    }

    pub fn complete_video(
        &mut self,
        ticket: VideoTicket,
        result: Result<Value, PipelineError>,
    ) -> Result<Completion, PipelineError> {
        if self.state != (PipelineState::VideoRequested { run: ticket.run }) {
            debug!("Dropping stale video response (run {})", ticket.run);
            return Ok(Completion::Stale);
        }

        match result {
            Ok(value) => {
                self.clips = normalize_clips(&value);
                self.last_error = None;
                self.state = PipelineState::ClipsReady;
                info!("Video ready with {} clips", self.clips.len());
                Ok(Completion::Applied)
            }
            Err(e) => self.fail(e),
        }
    }

    pub async fn generate_video(
        &mut self,
        backend: &dyn GenerationBackend,
        fetcher: &dyn ImageFetcher,
    ) -> Result<Completion, PipelineError> {
        let ticket = self.begin_video_request(fetcher, backend.base_url()).await?;
        let result = backend.generate_video(&ticket.request).await;
        self.complete_video(ticket, result)
    }

    /// Back to the last settled state; user data is left alone.
    fn fail(&mut self, error: PipelineError) -> Result<Completion, PipelineError> {
        warn!("{}", error);
        self.last_error = Some(error.to_string());
        self.state = self.settled_state();
        Err(error)
    }

    // --- Row editing ---

    fn ensure_editable(&self) -> Result<(), PipelineError> {
        if self.is_busy() {
            Err(PipelineError::Busy)
        } else {
            Ok(())
        }
    }

    pub fn edit_cell(&mut self, index: usize, column: &str, text: &str) -> Result<(), PipelineError> {
        self.ensure_editable()?;
        let row = self
            .rows
            .get_mut(index)
            .ok_or_else(|| PipelineError::validation(format!("No row {}", index + 1)))?;
        row.set_cell_text(column, text);
        Ok(())
    }

    pub fn add_row(&mut self) -> Result<(), PipelineError> {
        self.ensure_editable()?;
        script::add_row(&mut self.rows);
        self.state = self.settled_state();
        Ok(())
    }

    pub fn delete_row(&mut self, index: usize) -> Result<bool, PipelineError> {
        self.ensure_editable()?;
        let removed = script::delete_row(&mut self.rows, index);
        self.state = self.settled_state();
        Ok(removed)
    }
}
