use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use tanal::{
    session::AnalysisReport, AnalysisResult, AnalysisSession, AudioLoader, Config, NoCache,
};

#[derive(Parser)]
#[command(
    name = "tanal",
    version,
    about = "Estimate how the tempo of a recording changes over time",
    long_about = "tanal estimates a static tempo and a per-hop tempo curve for an audio file, splits the curve into constant-tempo segments, and can render the detected beats as clicks over the original audio."
)]
struct Cli {
    /// Audio file (wav, mp3, flac, ogg, m4a, wma, aiff)
    audio: PathBuf,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start of the analyzed window in seconds
    #[arg(long)]
    start: Option<f64>,

    /// End of the analyzed window in seconds (0 = end of file)
    #[arg(long)]
    end: Option<f64>,

    /// Initial tempo guess in BPM
    #[arg(long)]
    start_bpm: Option<f64>,

    /// Use --start-bpm as given instead of deriving it from a first pass
    #[arg(long)]
    no_auto_start_bpm: bool,

    /// Standard deviation of the tempo prior, in octaves
    #[arg(long)]
    std_bpm: Option<f64>,

    /// Upper bound on detected tempo
    #[arg(long)]
    max_bpm: Option<f64>,

    /// How closely beats follow the tempo estimate
    #[arg(long)]
    tightness: Option<f64>,

    /// Samples between analysis frames
    #[arg(long)]
    hop_length: Option<usize>,

    /// Autocorrelation window in seconds
    #[arg(long)]
    ac_size: Option<f64>,

    /// Keep weak leading and trailing beats
    #[arg(long)]
    no_trim: bool,

    /// Volume of the original audio under the clicks (0-100)
    #[arg(long)]
    volume: Option<u8>,

    /// Click frequency in Hz
    #[arg(long)]
    click_freq: Option<f64>,

    /// Click duration in seconds
    #[arg(long)]
    click_duration: Option<f64>,

    /// Write the click-mixed audio to this WAV file
    #[arg(short, long)]
    output_wav: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command-line values on top of the configuration file
    fn apply_overrides(&self, config: &mut Config) {
        let analysis = &mut config.analysis;
        if let Some(v) = self.start_bpm {
            analysis.start_bpm = v;
        }
        if let Some(v) = self.std_bpm {
            analysis.std_bpm = v;
        }
        if let Some(v) = self.max_bpm {
            analysis.max_bpm = v;
        }
        if let Some(v) = self.tightness {
            analysis.tightness = v;
        }
        if let Some(v) = self.hop_length {
            analysis.hop_length = v;
        }
        if let Some(v) = self.ac_size {
            analysis.ac_size = v;
        }
        if self.no_trim {
            analysis.trim = false;
        }
        if self.no_auto_start_bpm {
            analysis.start_bpm_auto = false;
        }

        if let Some(v) = self.start {
            config.window.start = v;
        }
        if let Some(v) = self.end {
            config.window.end = Some(v);
        }

        let playback = &mut config.playback;
        if let Some(v) = self.volume {
            playback.volume = v;
        }
        if let Some(v) = self.click_freq {
            playback.click_freq = v;
        }
        if let Some(v) = self.click_duration {
            playback.click_duration = v;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for results
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting tanal v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => Config::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    let session = AnalysisSession::with_loader(
        AudioLoader::with_sample_rate(config.sample_rate),
        Arc::new(NoCache),
    );
    let result = session
        .analyze(&cli.audio, &config.analysis, &config.window)
        .with_context(|| format!("analysis of {} failed", cli.audio.display()))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result.report())?);
    } else {
        print_report(&result.report());
    }

    if let Some(path) = &cli.output_wav {
        write_click_track(&result, &config, path)?;
        info!("Click track saved to: {:?}", path);
    }

    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("Window:       {:.3}s - {:.3}s", report.start, report.end);
    println!("Static tempo: {:.2} BPM", report.static_tempo);
    match report.first_beat {
        Some(t) => println!("First beat:   {:.3}s", t),
        None => println!("First beat:   none"),
    }
    println!();
    println!("{:>10} {:>10} {:>10}", "start", "end", "bpm");
    for segment in &report.segments {
        println!(
            "{:>10.3} {:>10.3} {:>10.2}",
            segment.start, segment.end, segment.bpm
        );
    }
}

fn write_click_track(result: &AnalysisResult, config: &Config, path: &Path) -> Result<()> {
    let (samples, sample_rate) = result.render_with(&config.playback)?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("cannot create {}", path.display()))?;
    for sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(())
}
