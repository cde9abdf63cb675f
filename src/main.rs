use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Select, Text};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storyforge::core::config::Config;
use storyforge::core::document::{DocumentNode, NodeKind};
use storyforge::core::io::{NativeStorage, Storage};
use storyforge::core::library::{Library, LibraryStore};
use storyforge::core::state::BACKGROUND_MOODS;
use storyforge::services::ai::{AiGateway, ArchitectAction};
use storyforge::services::comic::ComicBoard;
use storyforge::services::editor::Editor;
use storyforge::services::gemini::GeminiClient;
use storyforge::services::narration::{NarrationOutcome, NarrationPhase, Narrator};
use storyforge::services::publish::Publisher;
use storyforge::services::setup;

struct Studio {
    config: Config,
    ai: Arc<AiGateway>,
    store: LibraryStore,
    library: Library,
    publisher: Publisher,
}

async fn spin<T>(message: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    let result = work.await;
    pb.finish_and_clear();
    result
}

fn report(result: Result<()>) {
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
    }
}

/// Outline entries as (id, indented label), in reading order.
fn outline(tree: &DocumentNode) -> Vec<(String, String)> {
    fn visit(node: &DocumentNode, depth: usize, out: &mut Vec<(String, String)>) {
        out.push((
            node.id.clone(),
            format!("{}[{}] {}", "  ".repeat(depth), node.kind.label(), node.title),
        ));
        for child in &node.children {
            visit(child, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    visit(tree, 0, &mut out);
    out
}

fn pick_node(editor: &Editor) -> Result<Option<String>> {
    let entries = outline(editor.tree());
    let labels: Vec<String> = entries.iter().map(|(_, l)| l.clone()).collect();
    let Some(choice) = Select::new("Select a node:", labels).raw_prompt_skippable()? else {
        return Ok(None);
    };
    Ok(entries.get(choice.index).map(|(id, _)| id.clone()))
}

async fn narrate(studio: &Studio, editor: &Editor, narrator: &Arc<Narrator>) -> Result<()> {
    let characters = &editor.work().characters;
    let mut options = vec!["Default character voice".to_string()];
    options.extend(characters.iter().map(|c| {
        let voice = c.voice_name.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
        format!("{} ({})", c.name, voice)
    }));
    let choice = Select::new("Dialogue voice:", options).raw_prompt()?;
    let character_id = choice
        .index
        .checked_sub(1)
        .and_then(|i| characters.get(i))
        .map(|c| c.id.clone());
    let atmosphere = Text::new("Atmosphere:")
        .with_default(&studio.config.narration.atmosphere)
        .prompt()?;

    let request = editor.narration_request(character_id.as_deref(), Some(atmosphere))?;
    let task = tokio::spawn({
        let narrator = narrator.clone();
        async move { narrator.narrate(request).await }
    });
    let cancel = narrator.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    while !task.is_finished() {
        let status = narrator.status();
        pb.set_length(status.total_chunks as u64);
        pb.set_position(status.chunk as u64);
        pb.set_message(match status.phase {
            NarrationPhase::Cleaning => "cleaning script (Ctrl-C to stop)",
            NarrationPhase::Generating => "synthesizing (Ctrl-C to stop)",
            NarrationPhase::Playing => "playing (Ctrl-C to stop)",
            _ => "",
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    ctrl_c.abort();

    match task.await? {
        Ok(NarrationOutcome::Completed) => {
            pb.finish_with_message("Narration complete");
            if Confirm::new("Export the narration as WAV?").with_default(true).prompt()? {
                let wav = narrator.export_wav()?;
                let key = studio.publisher.export_audio(&editor.selected()?.title, &wav).await?;
                println!("Saved {}/{}", studio.config.output_folder, key);
            }
            Ok(())
        }
        Ok(NarrationOutcome::Cancelled) => {
            pb.abandon_with_message("Narration cancelled");
            Ok(())
        }
        Err(e) => {
            let message = narrator.status().message.unwrap_or_default();
            pb.abandon_with_message(message);
            Err(e)
        }
    }
}

async fn comic(studio: &Studio, editor: &Editor) -> Result<()> {
    let node = editor.selected()?;
    let mut board = ComicBoard::new();
    let count = spin(
        "Scripting panels",
        board.script(&studio.ai, &node.content, &editor.work().characters),
    )
    .await?;
    for (i, panel) in board.panels().iter().enumerate() {
        println!("{:>2}. {}\n    \"{}\"", i + 1, panel.description, panel.dialogue);
    }
    if count == 0 || !Confirm::new("Draw every panel?").with_default(true).prompt()? {
        return Ok(());
    }

    let drawn = spin("Drawing panels", async { Ok(board.draw_all(&studio.ai).await) }).await?;
    println!(
        "{} drawn, {} skipped, {} failed",
        drawn.drawn.len(),
        drawn.skipped.len(),
        drawn.failed.len()
    );
    for (i, panel) in board.panels().iter().enumerate() {
        if let Some(png) = &panel.image {
            let name = format!("{} panel {:02}", node.title, i + 1);
            studio.publisher.export_image(&name, png).await?;
        }
    }
    Ok(())
}

async fn edit_work(studio: &mut Studio, mut editor: Editor) -> Result<()> {
    let narrator = Arc::new(Narrator::new(studio.ai.clone(), studio.config.narration.clone()));
    let actions = vec![
        "Select node",
        "Premise & setting",
        "Rename node",
        "Add chapter",
        "Architect full structure",
        "Deepen selected node",
        "Write prose",
        "Characters",
        "Narrate",
        "Comic",
        "Scene illustration",
        "Cinematic video",
        "Export manuscript",
        "Save",
        "Back",
    ];

    loop {
        let selected = editor.selected()?.title.clone();
        let prompt = format!("{} > {}", editor.work().title, selected);
        let Some(action) = Select::new(&prompt, actions.clone()).prompt_skippable()? else {
            break;
        };
        let result: Result<()> = match action {
            "Select node" => match pick_node(&editor) {
                Ok(Some(id)) => editor.select(&id),
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            },
            "Premise & setting" => {
                let premise = Text::new("Premise:").with_default(&editor.work().premise).prompt()?;
                let setting = Text::new("Setting:").with_default(&editor.work().setting).prompt()?;
                editor.set_premise(premise);
                editor.set_setting(setting);
                Ok(())
            }
            "Rename node" => {
                let title = Text::new("Title:").with_default(&selected).prompt()?;
                let id = editor.selected()?.id.clone();
                editor.rename(&id, title)
            }
            "Add chapter" => {
                let id = editor.selected()?.id.clone();
                editor
                    .insert_node(&id, NodeKind::Chapter, "New section")
                    .map(|_| ())
            }
            "Architect full structure" => spin("Designing structure", editor.architect(ArchitectAction::FullStructure))
                .await
                .map(|n| println!("{} nodes added", n)),
            "Deepen selected node" => spin("Deepening", editor.architect(ArchitectAction::Deepen))
                .await
                .map(|n| println!("{} nodes added", n)),
            "Write prose" => spin("Writing", editor.write_prose())
                .await
                .map(|n| println!("{} characters written", n)),
            "Characters" => characters(&mut editor),
            "Narrate" => narrate(studio, &editor, &narrator).await,
            "Comic" => comic(studio, &editor).await,
            "Scene illustration" => {
                let title = editor.selected()?.title.clone();
                match spin("Painting", editor.draw_scene()).await {
                    Ok(png) => studio.publisher.export_image(&title, &png).await.map(|key| {
                        println!("Saved {}/{}", studio.config.output_folder, key)
                    }),
                    Err(e) => Err(e),
                }
            }
            "Cinematic video" => {
                let mood = Select::new("Background mood:", BACKGROUND_MOODS.to_vec()).prompt()?;
                let title = editor.selected()?.title.clone();
                if editor.scene(&editor.selected()?.id).is_some() {
                    println!("Starting from the scene illustration of '{}'.", title);
                }
                let video = spin(
                    "Rendering video (this takes minutes)",
                    editor.generate_video(&mood),
                )
                .await;
                match video {
                    Ok(mp4) => studio.publisher.export_video(&title, &mp4).await.map(|key| {
                        println!("Saved {}/{}", studio.config.output_folder, key)
                    }),
                    Err(e) => Err(e),
                }
            }
            "Export manuscript" => studio
                .publisher
                .export_manuscript(editor.work())
                .await
                .map(|key| println!("Saved {}/{}", studio.config.output_folder, key)),
            "Save" => editor.save(&mut studio.library, &studio.store).await,
            _ => break,
        };
        report(result);
    }
    Ok(())
}

fn characters(editor: &mut Editor) -> Result<()> {
    let mut options: Vec<String> = editor
        .work()
        .characters
        .iter()
        .map(|c| format!("{} ({}, {})", c.name, c.role, c.voice_name.map(|v| v.to_string()).unwrap_or_default()))
        .collect();
    options.push("+ New character".to_string());
    let index = Select::new("Characters:", options).raw_prompt()?.index;

    let id = match editor.work().characters.get(index) {
        Some(c) => c.id.clone(),
        None => editor.add_character(),
    };
    let current = editor.work().character(&id).cloned();
    let Some(current) = current else {
        return Ok(());
    };
    let name = Text::new("Name:").with_default(&current.name).prompt()?;
    let description = Text::new("Description:")
        .with_default(&current.description)
        .prompt()?;
    let voice = setup::select_voice("Voice:", current.voice_name)?;
    editor.update_character(&id, |c| {
        c.name = name;
        c.description = description;
        c.voice_name = Some(voice);
    })
}

async fn run(mut studio: Studio) -> Result<()> {
    loop {
        let mut options: Vec<String> = studio
            .library
            .works
            .iter()
            .map(|w| format!("{} ({})", w.title, w.last_updated.format("%Y-%m-%d %H:%M")))
            .collect();
        options.push("+ New work".to_string());
        options.push("Delete a work".to_string());
        options.push("Quit".to_string());

        let Some(choice) = Select::new("Library:", options).raw_prompt_skippable()? else {
            break;
        };
        let index = choice.index;
        let works = studio.library.works.len();

        if index < works {
            let work = studio.library.works[index].clone();
            let editor = Editor::open(studio.ai.clone(), work);
            edit_work(&mut studio, editor).await?;
        } else if index == works {
            let title = Text::new("Title:").with_default("New work").prompt()?;
            studio.library.create_work(title);
            report(studio.store.save(&studio.library).await);
        } else if index == works + 1 && works > 0 {
            let titles: Vec<String> = studio.library.works.iter().map(|w| w.title.clone()).collect();
            let target = Select::new("Delete which work?", titles).raw_prompt()?;
            if let Some(work) = studio.library.works.get(target.index) {
                let id = work.id.clone();
                if Confirm::new(&format!("Delete '{}' for good?", target.value))
                    .with_default(false)
                    .prompt()?
                {
                    studio.library.delete_work(&id);
                    report(studio.store.save(&studio.library).await);
                }
            }
        } else if index == works + 2 {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please create 'config.yml' (an empty file is enough to start).");
            return Err(e);
        }
    };
    config.ensure_directories()?;
    setup::run_setup(&mut config)?;

    let backend = Arc::new(GeminiClient::new(&config.gemini)?);
    let ai = Arc::new(AiGateway::new(backend, &config));
    let data: Arc<dyn Storage> = Arc::new(NativeStorage::new(&config.data_folder));
    let store = LibraryStore::new(data, config.library_key.clone());
    let library = store.load().await?;
    let publisher = Publisher::new(Arc::new(NativeStorage::new(&config.output_folder)));

    run(Studio {
        config,
        ai,
        store,
        library,
        publisher,
    })
    .await
}
