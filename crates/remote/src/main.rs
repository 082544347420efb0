#![allow(clippy::redundant_closure_call)]

use std::{path::Path, str::FromStr};

use anyhow::anyhow;
use clap::Parser;
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::StreamExt;
use log::LevelFilter;
use reedline::{DefaultPrompt, DefaultPromptSegment, Prompt, Reedline};
use tokio::sync::{mpsc, oneshot, watch};
use ustepper_protocol::{BrakeMethod, HomeDirection};
use ustepper_remote::{
    Driver, Intent, Notification, Request, ScriptClient, Session, Simulator, Timing,
    UploadRequest, WsTransport,
};
use ustepper_units::{PositionUnit, RateUnit};

/// How far one key press moves the jog ratio.
const JOG_STEP: f64 = 0.25;

#[derive(Parser)]
struct Args {
    /// WebSocket address of the device's control channel.
    #[arg(long, env = "USTEPPER_DEVICE", default_value = "ws://192.168.4.1:81/")]
    device: String,

    /// Address of the device's web server, which holds the recorded script.
    #[arg(long, env = "USTEPPER_HTTP", default_value = "http://192.168.4.1/")]
    http: String,

    /// Talk to a simulated device instead.
    #[arg(long)]
    simulate: bool,

    /// Upload this script to the device on startup.
    #[arg(long)]
    upload: Option<std::path::PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug)]
enum Error {
    Exit,
    Err(anyhow::Error),
}

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Error::Err(e.into())
    }
}

type Result<T> = std::result::Result<T, Error>;

fn init_logging(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

async fn print_notifications(mut notes: mpsc::UnboundedReceiver<Notification>) {
    while let Some(n) = notes.recv().await {
        match n {
            Notification::Line(line) => log::info!("Playing line {line}"),
            Notification::PlaybackEnded => log::info!("Playback finished"),
            Notification::Done => log::info!("Done"),
            Notification::Telemetry(tlm) => log::trace!("{tlm:?}"),
            other => log::debug!("{other:?}"),
        }
    }
}

fn string_prompt(s: &str) -> DefaultPrompt {
    DefaultPrompt::new(
        DefaultPromptSegment::Basic(s.to_owned()),
        DefaultPromptSegment::Empty,
    )
}

fn read_cmd(reed: &mut Reedline, prompt: &dyn Prompt) -> Result<String> {
    // Reading a line blocks, but the driver needs to keep running.
    let s = tokio::task::block_in_place(|| reed.read_line(prompt))?;
    match s {
        reedline::Signal::Success(s) => Ok(s),
        reedline::Signal::CtrlC | reedline::Signal::CtrlD => Err(Error::Exit),
    }
}

/// Takes the next argument from the command line, or asks for it.
fn arg<T>(words: &mut std::str::SplitWhitespace, reed: &mut Reedline, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let word = match words.next() {
        Some(w) => w.to_owned(),
        None => read_cmd(reed, &string_prompt(&format!("{what}? ")))?,
    };
    word.trim()
        .parse()
        .map_err(|e| Error::Err(anyhow!("bad {what} {word:?}: {e}")))
}

fn parse_brake(s: &str) -> anyhow::Result<BrakeMethod> {
    match s {
        "free" => Ok(BrakeMethod::Free),
        "cool" => Ok(BrakeMethod::Cool),
        "hard" => Ok(BrakeMethod::Hard),
        _ => Err(anyhow!("expected free, cool or hard")),
    }
}

fn parse_on_off(s: &str) -> anyhow::Result<bool> {
    match s {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(anyhow!("expected on or off")),
    }
}

fn parse_direction(s: &str) -> anyhow::Result<HomeDirection> {
    match s {
        "cw" => Ok(HomeDirection::Clockwise),
        "ccw" => Ok(HomeDirection::CounterClockwise),
        _ => Err(anyhow!("expected cw or ccw")),
    }
}

async fn jog(events: &mut EventStream, ratio: &watch::Sender<Option<f64>>) -> Result<()> {
    let mut current = 0.0f64;
    ratio.send_replace(Some(current));
    while let Some(ev) = events.next().await.transpose()? {
        let Event::Key(ev) = ev else {
            continue;
        };
        if ev.kind != KeyEventKind::Press {
            continue;
        }
        match ev.code {
            KeyCode::Char('s') => current = (current - JOG_STEP).max(-1.0),
            KeyCode::Char('d') => current = 0.0,
            KeyCode::Char('f') => current = (current + JOG_STEP).min(1.0),
            KeyCode::Char('q') => return Err(Error::Exit),
            KeyCode::Enter => return Ok(()),
            _ => continue,
        }
        ratio.send_replace(Some(current));
    }
    Err(anyhow!("event stream ended").into())
}

async fn handle_jog(ratio: &watch::Sender<Option<f64>>) -> Result<()> {
    eprintln!("Jogging. Keys s, d, f to slow down, stop and speed up, <enter> to finish.");
    enable_raw_mode()?;

    let err: Result<()> = (|| async move {
        let mut events = EventStream::new();
        jog(&mut events, ratio).await
    })()
    .await;

    // Letting go of the joystick.
    ratio.send_replace(None);
    disable_raw_mode()?;

    err
}

async fn request<T>(
    requests: &mpsc::Sender<Request>,
    make: impl FnOnce(oneshot::Sender<T>) -> Request,
) -> Result<T> {
    let (tx, rx) = oneshot::channel();
    requests.send(make(tx)).await.map_err(|_| Error::Exit)?;
    rx.await.map_err(|_| Error::Exit)
}

async fn print_status(requests: &mpsc::Sender<Request>) -> Result<()> {
    let snap = request(requests, Request::Snapshot).await?;
    let r = snap.readout();
    let pos = snap.position_unit.label();
    let vel = snap.rate_unit.velocity_label();
    let acc = snap.rate_unit.acceleration_label();
    eprintln!(
        "connection: {:?}{}",
        snap.status.state,
        if snap.status.config_known {
            ""
        } else {
            " (waiting for config)"
        }
    );
    eprintln!(
        "encoder: {:.2}{pos} (absolute {:.2}{pos}), {:.2} {vel}",
        r.encoder_position, r.encoder_absolute, r.encoder_velocity
    );
    eprintln!(
        "driver:  {:.2}{pos} (absolute {:.2}{pos}), {:.2} {vel}",
        r.driver_position, r.driver_absolute, r.driver_velocity
    );
    eprintln!(
        "config:  velocity {:.2} {vel}, acceleration {:.2} {acc}, brake {:?}, closed loop {}",
        r.velocity, r.acceleration, snap.config.brake_method, snap.config.closed_loop_enabled
    );
    eprintln!(
        "homing:  {:.2} {vel}, threshold {}, {:?}",
        r.home_velocity, snap.config.home_threshold, snap.config.home_direction
    );
    eprintln!(
        "recording: {}, playing: {}, line {}",
        snap.recording.is_recording, snap.recording.is_playing, snap.recording.current_line
    );
    eprintln!("commands sent: {}", snap.commands_sent);
    Ok(())
}

async fn print_script(requests: &mpsc::Sender<Request>) -> Result<()> {
    let lines = request(requests, Request::Script).await?;
    if lines.is_empty() {
        eprintln!("(no script)");
    }
    for (i, line) in lines.iter().enumerate() {
        let marker = if line.active { '>' } else { ' ' };
        eprintln!("{marker}{i:4} {}", line.text);
    }
    Ok(())
}

fn intent_for(
    cmd: &str,
    words: &mut std::str::SplitWhitespace,
    reed: &mut Reedline,
) -> Result<Option<Intent>> {
    let intent = match cmd {
        "speed" => Intent::SetVelocity(arg(words, reed, "velocity")?),
        "accel" => Intent::SetAcceleration(arg(words, reed, "acceleration")?),
        "brake" => match words.next() {
            Some(method) => Intent::SetBrake(parse_brake(method)?),
            None => Intent::Brake,
        },
        "closed-loop" => {
            let s: String = arg(words, reed, "on or off")?;
            Intent::SetClosedLoop(parse_on_off(&s)?)
        }
        "home-speed" => Intent::SetHomeVelocity(arg(words, reed, "velocity")?),
        "home-threshold" => Intent::SetHomeThreshold(arg(words, reed, "threshold")?),
        "home-dir" => {
            let s: String = arg(words, reed, "cw or ccw")?;
            Intent::SetHomeDirection(parse_direction(&s)?)
        }
        "move" => Intent::MoveBy(arg(words, reed, "distance")?),
        "move-to" => Intent::MoveTo(arg(words, reed, "position")?),
        "home" => Intent::Home,
        "stop" => Intent::EmergencyStop,
        "record" => Intent::ToggleRecording,
        "add" => Intent::AddLine,
        "play" => Intent::TogglePlay,
        "halt" => Intent::StopRecording,
        "reconnect" => Intent::Reconnect,
        "units" => {
            let which: String = arg(words, reed, "pos or rate")?;
            match which.as_str() {
                "pos" => Intent::SetPositionUnit(arg::<PositionUnit>(words, reed, "unit")?),
                "rate" => Intent::SetRateUnit(arg::<RateUnit>(words, reed, "unit")?),
                _ => return Err(anyhow!("expected pos or rate").into()),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(intent))
}

async fn command(
    s: &str,
    reed: &mut Reedline,
    requests: &mpsc::Sender<Request>,
    ratio: &watch::Sender<Option<f64>>,
) -> Result<()> {
    let mut words = s.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(());
    };

    if let Some(intent) = intent_for(cmd, &mut words, reed)? {
        requests
            .send(Request::Intent(intent))
            .await
            .map_err(|_| Error::Exit)?;
        return Ok(());
    }

    match cmd {
        "quit" => return Err(Error::Exit),
        "status" => print_status(requests).await?,
        "script" => print_script(requests).await?,
        "jog" => handle_jog(ratio).await?,
        "upload" => {
            let path: String = arg(&mut words, reed, "path")?;
            let upload = UploadRequest::from_path(Path::new(&path))?;
            requests
                .send(Request::Upload(upload))
                .await
                .map_err(|_| Error::Exit)?;
        }
        _ => eprintln!("error: unknown command {cmd:?}"),
    }
    Ok(())
}

async fn command_mode(
    requests: &mpsc::Sender<Request>,
    ratio: &watch::Sender<Option<f64>>,
) -> Result<()> {
    let mut reed = Reedline::create();
    let prompt = string_prompt("ustepper");
    loop {
        let s = read_cmd(&mut reed, &prompt)?;
        match command(s.trim(), &mut reed, requests, ratio).await {
            Err(Error::Err(e)) => eprintln!("error: {e}"),
            other => other?,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // Check the upload before connecting to anything.
    let upload = args
        .upload
        .as_deref()
        .map(UploadRequest::from_path)
        .transpose()?;

    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let (ratio_tx, ratio_rx) = watch::channel(None);
    let (req_tx, req_rx) = mpsc::channel(32);
    let timing = Timing::default();

    let driver = if args.simulate {
        let mut session = Session::new(Simulator::new(link_tx), ratio_rx);
        tokio::spawn(print_notifications(session.subscribe()));
        let driver = Driver::new(session, link_rx, req_rx, None::<ScriptClient>, timing);
        tokio::spawn(async move {
            driver.run().await;
        })
    } else {
        let scripts = ScriptClient::new(&args.http)?;
        let mut session = Session::new(WsTransport::new(&args.device, link_tx), ratio_rx);
        tokio::spawn(print_notifications(session.subscribe()));
        let driver = Driver::new(session, link_rx, req_rx, Some(scripts), timing);
        tokio::spawn(async move {
            driver.run().await;
        })
    };

    if let Some(upload) = upload {
        req_tx.send(Request::Upload(upload)).await?;
    }

    let res = command_mode(&req_tx, &ratio_tx).await;
    // The driver might already be gone, in which case there's nobody to tell.
    let _ = req_tx.send(Request::Quit).await;
    driver.await?;

    match res {
        Err(Error::Err(e)) => Err(e),
        _ => {
            eprintln!("exiting...");
            Ok(())
        }
    }
}
