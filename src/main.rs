//! amsound - Command-line host for the antimatter-sound engine.
//!
//! Plays the role of the game that drives the engine: it loads a file,
//! sends control messages, and pulls rendered audio.
//!
//! # Usage
//!
//! ```bash
//! amsound info music.mid
//! amsound play music.mid -t 2 -r
//! amsound render music.mid out.wav -t 0 --float
//! amsound render music.mid out_dir --all
//! ```
//!
//! Set `RUST_LOG=debug` for engine logging on stderr.

use antimatter_sound::audio::message::MAX_TRACKS;
use antimatter_sound::audio::mixer::PlaybackStatus;
use antimatter_sound::audio::{export_all, render_track, AudioEngine, Message, Mixer, RenderOptions};
use antimatter_sound::config::{OutputMode, SampleFormat, Settings};
use antimatter_sound::midi::{note_to_name, TrackReader};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode, ClearType};
use crossterm::{cursor, execute};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Input poll interval for the interactive player.
const POLL_INTERVAL: Duration = Duration::from_millis(16);

enum Command {
    Info,
    Play,
    Render,
}

/// Command-line options for the application.
struct CliOptions {
    command: Command,
    input: PathBuf,
    /// Output file, or directory with `--all`.
    output: Option<PathBuf>,
    track: u16,
    repeat: bool,
    queued: bool,
    all: bool,
    float: bool,
    seconds: Option<u32>,
    config: Option<PathBuf>,
}

fn print_help(program: &str) {
    eprintln!("amsound - Three-voice MIDI music engine");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {} info <file.mid>", program);
    eprintln!("  {} play <file.mid> [OPTIONS]", program);
    eprintln!("  {} render <file.mid> <out> [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -t, --track N          Track to play or render (default 0)");
    eprintln!("  -r, --repeat           Restart the track whenever it ends");
    eprintln!("  -c, --config PATH      Load settings from a JSON file");
    eprintln!("      --queued           Queue rendered buffers from the main loop");
    eprintln!("      --all              Render every track into the <out> directory");
    eprintln!("      --float            Write 32-bit float WAV files");
    eprintln!("      --seconds N        Longest render, in seconds");
    eprintln!("  -h, --help             Print this help message");
}

impl CliOptions {
    /// Parses command-line arguments.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let program = args.first().map(String::as_str).unwrap_or("amsound");

        let mut command = None;
        let mut positional: Vec<PathBuf> = Vec::new();
        let mut options = Self {
            command: Command::Info,
            input: PathBuf::new(),
            output: None,
            track: 0,
            repeat: false,
            queued: false,
            all: false,
            float: false,
            seconds: None,
            config: None,
        };
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--help" | "-h" => {
                    print_help(program);
                    std::process::exit(0);
                }
                "--track" | "-t" => {
                    i += 1;
                    let value = args.get(i).context("--track requires a number")?;
                    options.track = value
                        .parse()
                        .with_context(|| format!("Invalid track number: {}", value))?;
                }
                "--seconds" => {
                    i += 1;
                    let value = args.get(i).context("--seconds requires a number")?;
                    options.seconds = Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid length: {}", value))?,
                    );
                }
                "--config" | "-c" => {
                    i += 1;
                    let value = args.get(i).context("--config requires a path")?;
                    options.config = Some(PathBuf::from(value));
                }
                "--repeat" | "-r" => options.repeat = true,
                "--queued" => options.queued = true,
                "--all" => options.all = true,
                "--float" => options.float = true,
                "info" if command.is_none() => command = Some(Command::Info),
                "play" if command.is_none() => command = Some(Command::Play),
                "render" if command.is_none() => command = Some(Command::Render),
                other if other.starts_with('-') => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
                other => positional.push(PathBuf::from(other)),
            }
            i += 1;
        }

        let Some(command) = command else {
            print_help(program);
            std::process::exit(1);
        };
        let mut positional = positional.into_iter();
        options.command = command;
        options.input = positional.next().context("Missing input MIDI file")?;
        options.output = positional.next();
        if matches!(options.command, Command::Render) && options.output.is_none() {
            anyhow::bail!("render requires an output path");
        }

        Ok(options)
    }

    /// Loads settings and applies command-line overrides.
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from_file(path)
                .with_context(|| format!("Failed to load settings: {}", path.display()))?,
            None => Settings::default(),
        };
        if self.queued {
            settings.output = OutputMode::Queued;
        }
        if self.float {
            settings.sample_format = SampleFormat::Float32;
        }
        if let Some(seconds) = self.seconds {
            settings.render_seconds = seconds;
        }
        Ok(settings)
    }
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.settings()?;
    let data = std::fs::read(&cli.input)
        .with_context(|| format!("Failed to read MIDI file: {}", cli.input.display()))?;
    let reader = TrackReader::new(data)
        .with_context(|| format!("Failed to load MIDI file: {}", cli.input.display()))?;

    match cli.command {
        Command::Info => print_info(reader),
        Command::Play => run_player(reader, &cli, &settings),
        Command::Render => run_render(&reader, &cli, &settings),
    }
}

fn print_info(mut reader: TrackReader) -> Result<()> {
    println!("Format 2, {} tracks, division {}", reader.track_count(), reader.division());

    for id in 0..reader.track_count() {
        let summary = reader.summarize(id)?;
        let range = summary
            .note_range
            .map(|(low, high)| format!("{}-{}", note_to_name(low), note_to_name(high)))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  track {:3}: {:6} events {:5} notes {:8} ticks  range {}{}",
            id,
            summary.events,
            summary.note_ons,
            summary.ticks,
            range,
            if summary.terminated { "" } else { "  (truncated)" }
        );
    }
    Ok(())
}

fn run_render(reader: &TrackReader, cli: &CliOptions, settings: &Settings) -> Result<()> {
    let output = cli.output.clone().context("render requires an output path")?;
    let options = RenderOptions {
        track: cli.track,
        repeat: cli.repeat,
        engine: settings.engine.clone(),
        format: settings.sample_format,
        max_seconds: settings.render_seconds,
    };

    if cli.all {
        let paths = export_all(reader, &options, &output)?;
        for path in paths {
            println!("Wrote {}", path.display());
        }
        return Ok(());
    }

    let mut last_percent = None;
    let stats = render_track(
        reader,
        &options,
        &output,
        Some(|progress: f32| {
            let percent = (progress * 100.0) as u32;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                eprint!("\rRendering... {:3}%", percent);
            }
        }),
    )?;
    eprintln!();
    println!(
        "Wrote {} ({:.2}s, {} ticks{})",
        output.display(),
        stats.seconds(),
        stats.ticks,
        if stats.completed { "" } else { ", cut at length limit" }
    );
    Ok(())
}

/// Runs the interactive player until the user quits.
fn run_player(reader: TrackReader, cli: &CliOptions, settings: &Settings) -> Result<()> {
    // Play messages carry a 7-bit track id.
    let track_count = reader.track_count().min(MAX_TRACKS);
    if reader.track_count() > MAX_TRACKS {
        tracing::warn!(
            tracks = reader.track_count(),
            "only the first {} tracks can be played",
            MAX_TRACKS
        );
    }
    let mixer = Mixer::new(reader, &settings.engine);
    let mut engine =
        AudioEngine::new(mixer, settings.output).context("Failed to initialize audio")?;

    let mut player = Player {
        track: cli.track.min(track_count.saturating_sub(1)),
        track_count,
        repeat: cli.repeat,
        notice: String::new(),
    };
    player.start(&mut engine);

    enable_raw_mode().context("Failed to enable raw mode")?;
    let result = player.run(&mut engine);
    disable_raw_mode().context("Failed to disable raw mode")?;
    println!();

    result
}

struct Player {
    track: u16,
    track_count: u16,
    repeat: bool,
    /// Last failed request, shown on the status line.
    notice: String,
}

impl Player {
    /// Sends a message, keeping any failure for the status line.
    fn send(&mut self, engine: &mut AudioEngine, message: Message) {
        match engine.send(message) {
            Ok(()) => self.notice.clear(),
            Err(e) => {
                tracing::warn!(?message, "audio message failed: {}", e);
                self.notice = e.to_string();
            }
        }
    }

    fn start(&mut self, engine: &mut AudioEngine) {
        let track = self.track as u8;
        let message = if self.repeat {
            Message::Repeat(track)
        } else {
            Message::Play(track)
        };
        self.send(engine, message);
    }

    fn restart(&mut self, engine: &mut AudioEngine) {
        // Stop first: play requests are ignored while a track is running.
        self.send(engine, Message::Stop);
        self.start(engine);
    }

    fn run(&mut self, engine: &mut AudioEngine) -> Result<()> {
        let mut stdout = io::stdout();

        loop {
            engine.update()?;
            self.draw(&mut stdout, &engine.status())?;

            if !event::poll(POLL_INTERVAL)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                KeyCode::Char(' ') => self.start(engine),
                KeyCode::Char('s') => self.send(engine, Message::Stop),
                KeyCode::Char('m') => self.send(engine, Message::ToggleMute),
                KeyCode::Up => self.send(engine, Message::VolumeUp),
                KeyCode::Down => self.send(engine, Message::VolumeDown),
                KeyCode::Left => {
                    self.track = self.track.saturating_sub(1);
                    self.restart(engine);
                }
                KeyCode::Right => {
                    if self.track + 1 < self.track_count {
                        self.track += 1;
                    }
                    self.restart(engine);
                }
                KeyCode::Char('r') => {
                    self.repeat = !self.repeat;
                    self.restart(engine);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn draw(&self, out: &mut impl Write, status: &PlaybackStatus) -> Result<()> {
        let state = if status.playing { "playing" } else { "stopped" };
        let volume = if status.muted {
            "muted".to_string()
        } else {
            format!("vol {:2}", status.volume)
        };
        let notice = match status.last_error {
            Some(err) => format!("track data error: {}", err),
            None => self.notice.clone(),
        };
        execute!(
            out,
            cursor::MoveToColumn(0),
            terminal::Clear(ClearType::CurrentLine)
        )?;
        write!(
            out,
            "track {}/{}  {}  tick {:6}  {}  {}  {}",
            self.track,
            self.track_count.saturating_sub(1),
            state,
            status.clock,
            volume,
            if self.repeat { "repeat" } else { "once" },
            notice
        )?;
        out.flush()?;
        Ok(())
    }
}
