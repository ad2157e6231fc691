use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, MultiSelect, Select, Text};
use reelcast::core::config::{Config, CONFIG_FILE};
use reelcast::core::events::{CharactersChanged, EventBus, Notice};
use reelcast::core::state::{Character, ScriptRow};
use reelcast::services::backend::HttpBackend;
use reelcast::services::studio::{CharacterForm, CharacterStudio};
use reelcast::services::workflow::{PipelineController, PipelineState};
use reelcast::utils::media::read_attachment;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    CreateCharacter,
    DeleteCharacter,
    SelectCharacters,
    EditPrompt,
    StartImage,
    GenerateScript,
    ShowScript,
    EditCell,
    AddRow,
    DeleteRow,
    GenerateVideo,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CreateCharacter => "Create a character",
            Self::DeleteCharacter => "Delete a character",
            Self::SelectCharacters => "Select characters",
            Self::EditPrompt => "Edit prompt",
            Self::StartImage => "Set start image",
            Self::GenerateScript => "Generate script",
            Self::ShowScript => "Show script",
            Self::EditCell => "Edit a cell",
            Self::AddRow => "Add row",
            Self::DeleteRow => "Delete row",
            Self::GenerateVideo => "Generate video",
            Self::Quit => "Quit",
        };
        f.write_str(label)
    }
}

struct CharacterOption {
    key: String,
    label: String,
}

impl fmt::Display for CharacterOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn character_option(c: &Character) -> CharacterOption {
    let mut label = c.display_name().to_string();
    if let Some(desc) = c.description.as_deref().and_then(|d| d.lines().next()) {
        label.push_str(" - ");
        label.push_str(desc);
    }
    CharacterOption {
        key: c.selection_key(),
        label,
    }
}

async fn with_spinner<F: Future>(message: &str, fut: F) -> F::Output {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    let out = fut.await;
    pb.finish_and_clear();
    out
}

struct App {
    backend: Arc<HttpBackend>,
    studio: CharacterStudio,
    controller: PipelineController,
    changes: broadcast::Receiver<CharactersChanged>,
    notices: broadcast::Receiver<Notice>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(config.backend.clone())?);
        let events = EventBus::new();
        Ok(Self {
            studio: CharacterStudio::new(backend.clone(), events.clone()),
            controller: PipelineController::new(config.pipeline.clone(), events.clone()),
            changes: events.subscribe_characters(),
            notices: events.subscribe_notices(),
            backend,
        })
    }

    async fn refresh(&mut self) {
        let result = with_spinner(
            "Loading characters...",
            self.controller.refresh_catalog(self.backend.as_ref()),
        )
        .await;
        if let Err(e) = result {
            eprintln!("Could not load characters: {}", e);
        }
    }

    /// Applies queued events: a changed character list triggers one refresh.
    async fn pump_events(&mut self) {
        let mut changed = false;
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => changed = true,
                Err(_) => break,
            }
        }
        if changed {
            self.refresh().await;
        }
        while let Ok(notice) = self.notices.try_recv() {
            println!("! {}", notice.message);
        }
    }

    fn print_status(&self) {
        let selected: Vec<_> = self
            .controller
            .selected_characters()
            .iter()
            .map(|c| c.display_name().to_string())
            .collect();
        println!();
        println!(
            "Characters: {} available, selected [{}]",
            self.controller.catalog().len(),
            selected.join(", ")
        );
        if !self.controller.view().prompt_collapsed {
            println!("Prompt: {}", self.controller.prompt());
            if let Some(img) = self.controller.start_image() {
                println!("Start image: {}", img.name);
            }
        }
        println!(
            "Script rows: {}, clips: {}",
            self.controller.rows().len(),
            self.controller.clips().len()
        );
        if let Some(err) = self.controller.last_error() {
            println!("Last error: {}", err);
        }
    }

    fn actions(&self) -> Vec<Action> {
        let mut actions = vec![
            Action::CreateCharacter,
            Action::DeleteCharacter,
            Action::SelectCharacters,
            Action::EditPrompt,
            Action::StartImage,
            Action::GenerateScript,
        ];
        if !self.controller.rows().is_empty() {
            actions.extend([
                Action::ShowScript,
                Action::EditCell,
                Action::AddRow,
                Action::DeleteRow,
                Action::GenerateVideo,
            ]);
        } else {
            actions.push(Action::AddRow);
        }
        actions.push(Action::Quit);
        actions
    }

    async fn run(&mut self) -> Result<()> {
        self.refresh().await;
        loop {
            self.pump_events().await;
            self.print_status();

            let action = Select::new("What next?", self.actions()).prompt()?;
            if action == Action::Quit {
                return Ok(());
            }
            if let Err(e) = self.perform(action).await {
                match e.downcast_ref::<InquireError>() {
                    Some(InquireError::OperationCanceled) => {}
                    Some(InquireError::OperationInterrupted) => return Ok(()),
                    _ => eprintln!("Error: {:#}", e),
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Result<()> {
        match action {
            Action::CreateCharacter => self.create_character().await,
            Action::DeleteCharacter => self.delete_character().await,
            Action::SelectCharacters => self.select_characters(),
            Action::EditPrompt => {
                let prompt = Text::new("Prompt:")
                    .with_initial_value(self.controller.prompt())
                    .prompt()?;
                self.controller.set_prompt(prompt);
                self.controller.edit_prompt();
                Ok(())
            }
            Action::StartImage => {
                let path = Text::new("Start image path (empty to clear):").prompt()?;
                if path.trim().is_empty() {
                    self.controller.clear_start_image();
                } else {
                    let image = read_attachment(Path::new(path.trim())).await?;
                    println!("Attached {} ({})", image.name, image.mime);
                    self.controller.attach_start_image(image);
                }
                Ok(())
            }
            Action::GenerateScript => {
                with_spinner(
                    "Generating script...",
                    self.controller.generate_script(self.backend.as_ref()),
                )
                .await?;
                self.print_script();
                Ok(())
            }
            Action::ShowScript => {
                self.print_script();
                Ok(())
            }
            Action::EditCell => self.edit_cell(),
            Action::AddRow => {
                self.controller.add_row()?;
                self.print_script();
                Ok(())
            }
            Action::DeleteRow => {
                let index = self.pick_row("Delete which row?")?;
                self.controller.delete_row(index)?;
                Ok(())
            }
            Action::GenerateVideo => {
                let backend = self.backend.as_ref();
                with_spinner(
                    "Generating video...",
                    self.controller.generate_video(backend, backend),
                )
                .await?;
                self.print_clips();
                Ok(())
            }
            Action::Quit => Ok(()),
        }
    }

    async fn create_character(&mut self) -> Result<()> {
        let mut form = CharacterForm {
            name: Text::new("Name:").prompt()?,
            ..Default::default()
        };

        let describe_with = Select::new(
            "Description:",
            vec!["Write it myself", "Generate from a prompt"],
        )
        .prompt()?;
        let description_prompt = match describe_with {
            "Generate from a prompt" => Some(Text::new("Describe the character:").prompt()?),
            _ => {
                form.description = Text::new("Description:").prompt()?;
                None
            }
        };

        let portrait_with = Select::new(
            "Portrait:",
            vec![
                "None",
                "Generate from a prompt",
                "Generate from the description",
                "Load from file",
            ],
        )
        .prompt()?;
        let image_prompt = match portrait_with {
            "Generate from a prompt" => Some(Text::new("Image prompt:").prompt()?),
            "Load from file" => {
                let path = Text::new("Image path:").prompt()?;
                form.image = Some(read_attachment(Path::new(path.trim())).await?.data_url);
                None
            }
            _ => None,
        };

        // Description and portrait prompts are independent and run together.
        let (description, image) = with_spinner("Generating...", async {
            let describe = async {
                match &description_prompt {
                    Some(p) => self.studio.generate_description(p).await.map(Some),
                    None => Ok(None),
                }
            };
            let imagine = async {
                match &image_prompt {
                    Some(p) => self.studio.generate_image(p).await.map(Some),
                    None => Ok(None),
                }
            };
            tokio::join!(describe, imagine)
        })
        .await;
        if let Some(description) = description? {
            form.description = Text::new("Description:")
                .with_initial_value(&description)
                .prompt()?;
        }
        if let Some(image) = image? {
            form.image = Some(image);
        }

        if portrait_with == "Generate from the description" {
            let image = with_spinner(
                "Generating portrait...",
                self.studio.generate_image_from_description(&form.description),
            )
            .await?;
            form.image = Some(image);
        }

        println!("{}\n{}", form.name, form.description);
        println!("Portrait: {}", if form.image.is_some() { "yes" } else { "no" });
        if Confirm::new("Save this character?").with_default(true).prompt()? {
            with_spinner("Saving...", self.studio.save(&form)).await?;
            println!("Saved {}", form.name.trim());
        }
        Ok(())
    }

    async fn delete_character(&mut self) -> Result<()> {
        let options: Vec<_> = self
            .controller
            .catalog()
            .iter()
            .filter(|c| c.id.is_some())
            .map(character_option)
            .collect();
        if options.is_empty() {
            println!("No saved characters.");
            return Ok(());
        }
        let choice = Select::new("Delete which character?", options).prompt()?;
        if Confirm::new(&format!("Delete {}?", choice.label))
            .with_default(false)
            .prompt()?
        {
            self.studio.delete(&choice.key).await?;
        }
        Ok(())
    }

    fn select_characters(&mut self) -> Result<()> {
        let options: Vec<_> = self
            .controller
            .catalog()
            .iter()
            .map(character_option)
            .collect();
        if options.is_empty() {
            println!("No characters yet.");
            return Ok(());
        }
        let defaults: Vec<usize> = options
            .iter()
            .enumerate()
            .filter(|(_, o)| self.controller.is_selected(&o.key))
            .map(|(i, _)| i)
            .collect();

        let chosen = MultiSelect::new("Characters:", options)
            .with_default(&defaults)
            .prompt()?;

        self.controller.clear_selection();
        for option in chosen {
            self.controller.toggle_selection(&option.key)?;
        }
        Ok(())
    }

    fn pick_row(&self, message: &str) -> Result<usize> {
        let options: Vec<String> = self
            .controller
            .rows()
            .iter()
            .enumerate()
            .map(|(i, row)| format!("{}: {}", i + 1, row_summary(row)))
            .collect();
        let choice = Select::new(message, options).raw_prompt()?;
        Ok(choice.index)
    }

    fn edit_cell(&mut self) -> Result<()> {
        let index = self.pick_row("Edit which row?")?;
        let row = self
            .controller
            .rows()
            .get(index)
            .context("Row disappeared")?;
        let column = Select::new("Column:", row.columns()).prompt()?;
        let text = Text::new(&format!("{}:", column))
            .with_initial_value(&row.cell_text(&column))
            .prompt()?;
        self.controller.edit_cell(index, &column, &text)?;
        Ok(())
    }

    fn print_script(&self) {
        if self.controller.state() == PipelineState::Idle {
            println!("No script yet.");
            return;
        }
        for (i, row) in self.controller.rows().iter().enumerate() {
            println!("{:>3}. {}", i + 1, row_summary(row));
        }
    }

    fn print_clips(&self) {
        if self.controller.clips().is_empty() {
            println!("The backend returned no clips.");
        }
        for clip in self.controller.clips() {
            println!("{}  {}", clip.time, clip.url);
        }
    }
}

fn row_summary(row: &ScriptRow) -> String {
    row.columns()
        .iter()
        .map(|col| format!("{}={}", col, row.cell_text(col).replace('\n', " ")))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    if !Path::new(CONFIG_FILE).exists() {
        Config::default().save()?;
        println!("Wrote default {}", CONFIG_FILE);
    }

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please check 'config.yml' or the BACKEND_URL environment variable.");
            return Err(e);
        }
    };
    println!("Backend: {}", config.backend.base_url);

    let mut app = App::new(config)?;
    match app.run().await {
        Err(e) if matches!(
            e.downcast_ref::<InquireError>(),
            Some(InquireError::OperationCanceled | InquireError::OperationInterrupted)
        ) =>
        {
            Ok(())
        }
        other => other,
    }
}
