use crate::cli::{Cli, Commands, EncodeArgs};
use anyhow::{Context, Result, anyhow, bail};
use ffbench::config::{self, Config};
use ffbench::engine::{
    self, AccelerationChoice, CancelToken, CodecId, EncodeRequest, EngineError, ProgressSender,
    benchmark::{BenchmarkControl, BenchmarkEvent, BenchmarkScheduler, BenchmarkStore, TrialStatus, select_entries},
    capability::{CapabilityCache, CapabilityProber, ProbeSettings, ensure_synthetic_input},
    collab::{FfmpegQualityMetric, FfprobeMetadata},
    encode::{Encoder, FfmpegTrialRunner},
    hardware::{EncoderListing, SystemSnapshot},
};
use ffbench::report;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

pub fn run(cli: Cli) {
    if let Err(e) = init_logging(&cli) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::CheckFfmpeg => handle_check_ffmpeg(&config),
        Commands::Probe { timeout, input } => handle_probe(&config, timeout, input),
        Commands::Capabilities => handle_capabilities(&config),
        Commands::Benchmark {
            input,
            select,
            timeout,
            no_save,
            quality,
        } => handle_benchmark(&config, input, &select, timeout, no_save, quality),
        Commands::Encode(args) => handle_encode(&config, &args, cli.verbose),
        Commands::DryRun(args) => handle_dry_run(&config, &args),
        Commands::InitConfig => handle_init_config(),
    };

    if let Err(e) = result {
        match e.downcast_ref::<EngineError>() {
            Some(EngineError::ToolNotFound { tool }) => {
                eprintln!("Error: '{}' is not installed or not in PATH.", tool);
                eprintln!("Install ffmpeg (https://ffmpeg.org/download.html) or set [tools] in the config file.");
            }
            _ => eprintln!("Error: {:#}", e),
        }
        process::exit(1);
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    if let Some(path) = cli.log_file.as_deref() {
        return engine::init_logging(cli.verbose, Some(path));
    }
    if cfg!(feature = "dev-logging") {
        let path = engine::default_log_path()?;
        return engine::init_logging(cli.verbose.max(2), Some(&path));
    }
    engine::init_logging(cli.verbose, None)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn handle_check_ffmpeg(config: &Config) -> Result<()> {
    let version = engine::ffmpeg_version(&config.tools.ffmpeg, config.tools.probe_timeout())?;
    println!("ffmpeg found: {}", version);
    let probe_version = engine::ffprobe_version(&config.tools.ffprobe, config.tools.probe_timeout())?;
    println!("ffprobe found: {}", probe_version);

    match EncoderListing::query(&config.tools.ffmpeg, config.tools.probe_timeout()) {
        Ok(listing) => {
            let hardware: Vec<&str> = CodecId::VIDEO
                .iter()
                .flat_map(|&codec| AccelerationChoice::ALL.iter().map(move |&accel| (codec, accel)))
                .filter_map(|(codec, accel)| engine::hardware_encoder(codec, accel))
                .filter(|enc| listing.contains(enc))
                .collect();
            println!("{} encoders compiled in", listing.len());
            if !hardware.is_empty() {
                println!("Hardware encoders in this build: {}", hardware.join(", "));
                println!("Run `ffbench probe` to see which of them actually work here.");
            }
        }
        Err(e) => eprintln!("Warning: could not list encoders: {:#}", e),
    }
    Ok(())
}

fn handle_probe(config: &Config, timeout: Option<u64>, input: Option<PathBuf>) -> Result<()> {
    let mut settings = ProbeSettings::from(&config.probe);
    if let Some(secs) = timeout {
        settings.trial_timeout = std::time::Duration::from_secs(secs);
    }

    let input = match input {
        Some(path) => path,
        None => {
            let media_dir = config.paths.media_dir()?;
            ensure_synthetic_input(&config.tools.ffmpeg, &media_dir, &settings)
                .context("Failed to generate probe input")?
        }
    };

    let mut prober = CapabilityProber::new(
        FfmpegTrialRunner::new(&config.tools, &config.encode),
        settings,
    );
    match EncoderListing::query(&config.tools.ffmpeg, config.tools.probe_timeout()) {
        Ok(listing) => prober = prober.with_listing(listing),
        Err(e) => tracing::warn!(error = %e, "Encoder listing unavailable"),
    }

    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let entries = thread::scope(|s| {
        let worker = s.spawn(move || prober.probe(&input, Some(&tx), &cancel));
        for event in rx {
            println!(
                "[{:>2} of {}] {:<5} {:<7} {}",
                event.index,
                event.total,
                event.codec,
                event.acceleration,
                if event.available { "ok" } else { "unavailable" }
            );
        }
        worker.join()
    })
    .map_err(|_| anyhow!("probe thread panicked"))?;

    let cache = CapabilityCache::new(config.paths.capability_cache()?);
    let mut matrix = cache.load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Discarding unreadable capability cache");
        None
    })
    .unwrap_or_default();
    matrix.merge(entries);
    cache.save(&matrix)?;

    println!("\n{}", report::capability_report(&matrix));
    println!("\nSaved to {}", cache.path().display());
    Ok(())
}

fn handle_capabilities(config: &Config) -> Result<()> {
    let cache = CapabilityCache::new(config.paths.capability_cache()?);
    match cache.load()? {
        Some(matrix) => println!("{}", report::capability_report(&matrix)),
        None => println!(
            "No capability cache at {}. Run `ffbench probe` first.",
            cache.path().display()
        ),
    }
    Ok(())
}

fn handle_benchmark(
    config: &Config,
    input: PathBuf,
    select: &[(CodecId, AccelerationChoice)],
    timeout: Option<u64>,
    no_save: bool,
    quality: bool,
) -> Result<()> {
    let cache = CapabilityCache::new(config.paths.capability_cache()?);
    let matrix = cache
        .load()?
        .ok_or_else(|| anyhow!("No capability cache yet. Run `ffbench probe` first."))?;
    let selection = select_entries(&matrix, select);
    if selection.is_empty() {
        bail!("Nothing to benchmark: no selected pair is available in the capability cache");
    }

    let media = engine::probe_media(&config.tools.ffprobe, &input, config.tools.probe_timeout())
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let system = SystemSnapshot::capture(&config.tools.ffmpeg, config.tools.probe_timeout());

    let mut bench_config = config.benchmark.clone();
    if let Some(secs) = timeout {
        bench_config.trial_timeout_secs = secs;
    }
    let mut scheduler = BenchmarkScheduler::new(
        FfmpegTrialRunner::new(&config.tools, &config.encode),
        &bench_config,
    );
    if quality {
        scheduler = scheduler.with_quality(FfmpegQualityMetric::new(
            &config.tools,
            bench_config.trial_timeout(),
        ));
    }

    let (tx, rx) = mpsc::sync_channel(64);
    let control = BenchmarkControl::new();
    let run = thread::scope(|s| {
        let worker = s.spawn(move || {
            scheduler.run(&selection, &input, &media, system, Some(&tx), &control)
        });
        let mut stderr = std::io::stderr();
        for event in rx {
            match event {
                BenchmarkEvent::TrialStatus {
                    index,
                    total,
                    codec,
                    acceleration,
                    status: TrialStatus::Running,
                } => eprintln!("[{} of {}] {}/{} running", index, total, codec, acceleration),
                BenchmarkEvent::TrialStatus {
                    status: status @ (TrialStatus::Complete | TrialStatus::Failed),
                    index,
                    total,
                    ..
                } => eprintln!("\r[{} of {}] {:?}{:40}", index, total, status, ""),
                BenchmarkEvent::Progress { event, .. } => {
                    let _ = write!(stderr, "\r  {}", report::format_progress(&event));
                    let _ = stderr.flush();
                }
                _ => {}
            }
        }
        worker.join()
    })
    .map_err(|_| anyhow!("benchmark thread panicked"))??;

    println!("{}", report::benchmark_report(&run));

    if !no_save {
        let store = BenchmarkStore::new(config.paths.benchmark_history()?);
        store.append(&run)?;
        println!("\nSaved to {}", store.path().display());
    }
    Ok(())
}

fn build_request(config: &Config, args: &EncodeArgs) -> EncodeRequest {
    let mut request = EncodeRequest::new(&args.input, &args.output)
        .acceleration(args.accel)
        .overwrite(args.overwrite || config.encode.overwrite);
    request.codec = args.codec;
    request.preset = args.preset.clone();
    request.quality.crf = args.crf;
    request.quality.bitrate_kbps = args.bitrate;
    request.quality.target_size_bytes = args.target_size;
    request.width = args.width;
    request.height = args.height;
    request.framerate = args.fps;
    request.audio_bitrate_kbps = args.audio_bitrate;
    request.no_audio = args.no_audio;
    request.max_duration_secs = args.max_duration;
    request.extra_args = args.extra.clone().unwrap_or_default();
    request
}

fn make_encoder(config: &Config) -> Encoder {
    Encoder::new(config.tools.clone(), config.encode.clone())
        .with_metadata(Arc::new(FfprobeMetadata::new(&config.tools)))
}

fn handle_dry_run(config: &Config, args: &EncodeArgs) -> Result<()> {
    let request = build_request(config, args);
    let (command, _) = make_encoder(config).prepare(&request)?;

    for notice in &command.notices {
        println!("# note: {}", notice);
    }
    println!("{}", command.display(&config.tools.ffmpeg));
    Ok(())
}

fn handle_encode(config: &Config, args: &EncodeArgs, verbosity: u8) -> Result<()> {
    let request = build_request(config, args);
    if request.destination.exists() && !request.overwrite {
        bail!(
            "{} already exists (use --overwrite to replace it)",
            request.destination.display()
        );
    }

    let encoder = make_encoder(config);
    let (command, media) = encoder.prepare(&request)?;
    for notice in &command.notices {
        eprintln!("note: {}", notice);
    }
    tracing::info!(command = %command.display(&config.tools.ffmpeg), "Encoding");

    let (tx, rx) = mpsc::sync_channel(1);
    let cancel = CancelToken::new();
    let result = thread::scope(|s| {
        let worker = s.spawn(|| {
            let mut progress = ProgressSender::plain(tx);
            encoder.run_prepared(&request, command, media.as_ref(), Some(&mut progress), &cancel)
        });
        let mut stderr = std::io::stderr();
        for event in rx {
            let _ = write!(stderr, "\r{}   ", report::format_progress(&event));
            let _ = stderr.flush();
        }
        eprintln!();
        worker.join()
    })
    .map_err(|_| anyhow!("encode thread panicked"))?;

    match result {
        Ok(done) => {
            let outcome = done.outcome;
            println!(
                "Encoded {} in {} ({})",
                request.destination.display(),
                report::format_duration(outcome.wall_clock_secs),
                outcome
                    .file_size_bytes
                    .map(report::format_bytes)
                    .unwrap_or_else(|| "size unknown".to_string())
            );
            Ok(())
        }
        Err(e) => {
            if let Some(details) = e.details().filter(|d| !d.is_empty()) {
                if verbosity > 0 {
                    eprintln!("--- ffmpeg output ---\n{}", details.trim_end());
                } else {
                    eprintln!("(run with -v to see the full ffmpeg output)");
                }
            }
            Err(e.into())
        }
    }
}

fn handle_init_config() -> Result<()> {
    let path = Config::config_path()?;
    if Config::exists() {
        let cfg = Config::load_from(&path)?;
        println!("Config loaded successfully from {}", path.display());
        println!("{:#?}", cfg);
    } else {
        config::Config::ensure_default()?;
        println!("Default config saved to {}", path.display());
    }
    Ok(())
}
