use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};

use podtabs::config::{config_file_path, load_or_create};
use podtabs::pipeline::Pipeline;
use podtabs::sink::TrackList;
use podtabs::track::{Track, TrackLibrary};

/// Groups a track library dump the way the sort tabs would show it.
#[derive(Parser, Debug)]
#[command(name = "podtabs")]
#[command(version)]
struct Args {
    /// JSON array of tracks
    library: PathBuf,

    /// Select the entry NAME in stage STAGE, applied in order
    #[arg(long = "select", value_name = "STAGE=NAME", value_parser = parse_select)]
    selections: Vec<SelectRequest>,
}

#[derive(Debug, Clone)]
struct SelectRequest {
    stage: usize,
    name: String,
}

fn parse_select(text: &str) -> Result<SelectRequest, String> {
    let (stage, name) = text
        .split_once('=')
        .ok_or_else(|| format!("expected STAGE=NAME, got '{}'", text))?;
    let stage = stage
        .trim()
        .parse::<usize>()
        .map_err(|error| format!("invalid stage '{}': {}", stage, error))?;
    Ok(SelectRequest {
        stage,
        name: name.to_string(),
    })
}

fn print_pipeline(pipeline: &Pipeline, library: &TrackLibrary) {
    for index in 0..pipeline.stage_count() {
        let Some(stage) = pipeline.stage(index) else {
            continue;
        };
        println!("[{}] {}", index, stage.category.label());
        if stage.query().is_some() {
            println!("    {} tracks matched", pipeline.selected_tracks(Some(index)).len());
            continue;
        }
        for entry in pipeline.entry_summaries(index) {
            let marker = if entry.selected { '*' } else { ' ' };
            println!("  {} {} ({})", marker, entry.name, entry.member_count);
        }
    }

    println!("Displayed tracks:");
    for id in &pipeline.sink().tracks {
        if let Some(track) = library.get(*id) {
            println!("  {} - {} - {}", track.artist, track.album, track.title);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    let args = Args::parse();
    let library_path = args.library;

    let config = load_or_create(&config_file_path()?)?;
    let content = std::fs::read_to_string(&library_path)?;
    let tracks = serde_json::from_str::<Vec<Track>>(&content)?;
    info!(
        "Loaded {} tracks from {}",
        tracks.len(),
        library_path.display()
    );
    let library = TrackLibrary::from_tracks(tracks);

    let mut pipeline = Pipeline::new(config, TrackList::new());
    pipeline.load_source(&library, library.ids());
    pipeline.process_pending_selections(&library);

    for request in args.selections {
        if request.stage >= pipeline.stage_count() {
            warn!("Ignoring selection for missing stage {}", request.stage);
            continue;
        }
        pipeline.select_entries_by_name(request.stage, &[request.name]);
        pipeline.process_pending_selections(&library);
    }

    print_pipeline(&pipeline, &library);
    Ok(())
}
