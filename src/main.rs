// src/main.rs
//
// Offline renderer: loads a dataset, drives the engine through the same
// bridge a host would use and writes the result to a WAV file.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::{debug, info};

use metaharmony::{EngineConfig, FadeDirection, Report, create_bridge};

#[derive(Debug, Parser)]
#[command(name = "metaharmony", about = "Render a metabolic pathway dataset to audio")]
struct Args {
    /// Pathway dataset (JSON array or `{ "pathways": [...] }`).
    dataset: PathBuf,

    /// Output WAV file.
    #[arg(short, long, default_value = "metaharmony.wav")]
    output: PathBuf,

    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Length of the render in seconds.
    #[arg(short, long, default_value_t = 30.0)]
    seconds: f32,

    /// Pathway id to focus.
    #[arg(short, long)]
    focus: Option<String>,

    /// Seconds into the render at which focus is applied.
    #[arg(long, default_value_t = 0.0)]
    focus_at: f32,

    /// Comparison data (JSON object keyed by pathway id); enables comparison mode.
    #[arg(long)]
    comparison: Option<PathBuf>,

    /// Seconds into the render at which comparison mode is enabled.
    #[arg(long, default_value_t = 0.0)]
    comparison_at: f32,

    /// Fundamental frequency in Hz.
    #[arg(long)]
    fundamental: Option<f32>,

    /// Seed for stochastic behaviour; overrides the config file.
    #[arg(long)]
    seed: Option<u64>,

    /// Cascade pathways in at the start instead of entering all at once.
    #[arg(long)]
    cascade_in: bool,

    /// Fade the whole output in over this many seconds at the start.
    #[arg(long)]
    fade_in: Option<f32>,

    /// Fade the whole output out over the last this many seconds.
    #[arg(long)]
    fade_out: Option<f32>,
}

/// A control change applied once the render reaches `at` frames.
struct Cue {
    at: usize,
    action: Action,
}

enum Action {
    Focus(String),
    Comparison(String),
    FadeOut(f32),
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = EngineConfig::load_or_default(args.config.as_deref()).sanitized();
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.fade_in.is_some() {
        config.context.start_faded_out = true;
    }
    // the engine runs at the sanitized rate; the header and cues must agree
    let sample_rate = config.sample_rate;
    let block = config.block_size;

    let (mut session, mut engine) = create_bridge(config);

    let count = session.load_dataset_file(&args.dataset)?;
    info!("loaded {count} pathways from {}", args.dataset.display());

    if let Some(hz) = args.fundamental {
        session.set_fundamental(hz)?;
    }
    if args.cascade_in {
        session.cascade_fade(FadeDirection::In, None)?;
    }
    if let Some(secs) = args.fade_in {
        session.master_fade(FadeDirection::In, Some(secs))?;
    }

    let frame_at = |secs: f32| (secs.max(0.0) * sample_rate) as usize;
    let mut cues = Vec::new();
    if let Some(id) = &args.focus {
        cues.push(Cue {
            at: frame_at(args.focus_at),
            action: Action::Focus(id.clone()),
        });
    }
    if let Some(path) = &args.comparison {
        cues.push(Cue {
            at: frame_at(args.comparison_at),
            action: Action::Comparison(std::fs::read_to_string(path)?),
        });
    }
    if let Some(secs) = args.fade_out {
        cues.push(Cue {
            at: frame_at(args.seconds - secs),
            action: Action::FadeOut(secs),
        });
    }
    cues.sort_by_key(|cue| std::cmp::Reverse(cue.at));

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&args.output, spec)?;

    let total = frame_at(args.seconds);
    let mut left = vec![0.0f32; block];
    let mut right = vec![0.0f32; block];
    let mut rendered = 0;

    while rendered < total {
        while cues.last().is_some_and(|cue| cue.at <= rendered) {
            let Some(cue) = cues.pop() else { break };
            match cue.action {
                Action::Focus(id) => {
                    info!("{:.2}s: focus {id}", rendered as f32 / sample_rate);
                    session.set_focus(Some(&id))?;
                }
                Action::Comparison(json) => {
                    info!("{:.2}s: comparison mode on", rendered as f32 / sample_rate);
                    session.set_comparison_json(true, &json)?;
                }
                Action::FadeOut(secs) => {
                    info!("{:.2}s: fading out over {secs:.2}s", rendered as f32 / sample_rate);
                    session.master_fade(FadeDirection::Out, Some(secs))?;
                }
            }
        }

        // stop at the next cue so it lands on a block boundary
        let until = cues.last().map_or(total, |cue| cue.at.min(total));
        let frames = block.min(until - rendered);
        engine.render(&mut left[..frames], &mut right[..frames]);
        for (l, r) in left[..frames].iter().zip(&right[..frames]) {
            writer.write_sample(*l)?;
            writer.write_sample(*r)?;
        }
        rendered += frames;

        session.collect_garbage();
        for report in session.poll_telemetry() {
            match &report {
                Report::Ready(ready) => info!(
                    "engine ready: generation {}, {} voices",
                    ready.generation, ready.voice_count
                ),
                Report::State(_) => debug!("{}", serde_json::to_string(&report)?),
            }
        }
    }
    writer.finalize()?;

    let readback = session.readback();
    info!(
        "wrote {:.1}s to {} (peaks {:.3}/{:.3}, {} non-finite samples replaced)",
        rendered as f32 / sample_rate,
        args.output.display(),
        readback.output_peaks[0],
        readback.output_peaks[1],
        readback.non_finite_samples,
    );
    Ok(())
}
