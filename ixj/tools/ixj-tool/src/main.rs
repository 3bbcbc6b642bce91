use std::fs;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use audio_thread_priority::promote_current_thread_to_real_time;
use clap::{Parser, Subcommand, Args, ArgEnum};
use crossbeam::channel::Receiver;
use log::warn;

use ixj::cadence::{Cadence, CadenceArm};
use ixj::callerid::{CallerId, CidKind};
use ixj::fsk::{FskBuffer, DEFAULT_CAPACITY};
use ixj::hook::CardKind;
use ixj::port::RawPortIo;
use ixj::sim::SimCard;
use ixj::timer::TimerThread;
use ixj::{Card, CardConfig, PhoneEvent};
use ixj_pac::device::Window;
use ixj_pac::register::DaaMode;

use crate::display::{print_event, print_note};

mod display;

#[derive(thiserror::Error, Debug)]
pub(crate) enum ToolError {
    #[error(transparent)]
    Card(#[from] ixj::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) type Result<T> = std::result::Result<T, ToolError>;

#[derive(Parser)]
#[clap(author, version, about, long_about=None)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(ArgEnum, Clone, Copy)]
pub(crate) enum Kind {
    PhoneJack,
    LineJack,
    Lite,
    Pci,
    PhoneCard,
}

impl From<Kind> for CardKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::PhoneJack => CardKind::PhoneJack,
            Kind::LineJack  => CardKind::LineJack,
            Kind::Lite      => CardKind::PhoneJackLite,
            Kind::Pci       => CardKind::PhoneJackPci,
            Kind::PhoneCard => CardKind::PhoneCard,
        }
    }
}

fn parse_u16(s: &str) -> std::result::Result<u16, ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// Card settings shared by the commands that run a card.
#[derive(Args)]
pub(crate) struct CardArgs {
    /// Timer calls per second.
    #[clap(long, default_value = "100")]
    pub samplerate: u32,

    #[clap(long, default_value = "320")]
    pub winktime_ms: u32,

    /// POTS ring bitmap, one bit per half second.
    #[clap(long, parse(try_from_str = parse_u16), default_value = "0xc0c0")]
    pub ring_cadence: u16,

    /// LineJACK: bridge the POTS port onto the line.
    #[clap(long)]
    pub pots_pstn: bool,
}

impl CardArgs {
    fn config(&self, kind: CardKind) -> CardConfig {
        CardConfig {
            kind,
            samplerate: self.samplerate,
            winktime_ms: self.winktime_ms,
            ring_cadence: self.ring_cadence,
            pots_pstn: self.pots_pstn,
            ..Default::default()
        }
    }
}

#[derive(Args)]
pub(crate) struct CidArgs {
    #[clap(long)]
    pub number: String,

    #[clap(long, default_value = "")]
    pub name: String,

    /// MMDD
    #[clap(long, default_value = "0101")]
    pub date: String,

    /// HHMM
    #[clap(long, default_value = "0000")]
    pub time: String,

    /// Render call-waiting (off-hook) Caller-ID instead of on-hook.
    #[clap(long)]
    pub waiting: bool,

    /// Output file, 8 kHz 16-bit mono in host byte order.
    #[clap(long)]
    pub out: PathBuf,
}

#[derive(Args)]
pub(crate) struct SimulateArgs {
    #[clap(long, default_value = "3")]
    pub rings: usize,

    #[clap(long, default_value = "400")]
    pub on_ms: u32,

    #[clap(long, default_value = "800")]
    pub off_ms: u32,

    /// Have the DAA report an inbound Caller-ID burst after the first ring.
    #[clap(long)]
    pub caller_id: bool,

    #[clap(flatten)]
    pub card: CardArgs,
}

#[derive(Args)]
pub(crate) struct MonitorArgs {
    #[clap(long, arg_enum, default_value = "line-jack")]
    pub kind: Kind,

    #[clap(long, parse(try_from_str = parse_u16), default_value = "0x300")]
    pub dsp_base: u16,

    #[clap(long, parse(try_from_str = parse_u16), default_value = "0x310")]
    pub xilinx_base: u16,

    #[clap(flatten)]
    pub card: CardArgs,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    #[clap(name="cid")]
    Cid(CidArgs),

    #[clap(name="simulate")]
    Simulate(SimulateArgs),

    #[clap(name="monitor")]
    Monitor(MonitorArgs),
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Cli::parse();

    match args.command {
        Commands::Cid(a) => cid(a)?,
        Commands::Simulate(a) => simulate(a)?,
        Commands::Monitor(a) => monitor(a)?,
    }

    Ok(())
}

///////////////////////////////////////////////////////////////////////

fn split_pair(s: &str, what: &'static str) -> Result<(String, String)> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ixj::Error::Invalid(what).into());
    }
    Ok((s[..2].to_string(), s[2..].to_string()))
}

fn cid(a: CidArgs) -> Result<()> {
    let (month, day) = split_pair(&a.date, "date")?;
    let (hour, min) = split_pair(&a.time, "time")?;
    let caller_id = CallerId {
        month,
        day,
        hour,
        min,
        number: a.number,
        name: a.name,
    };

    let kind = if a.waiting { CidKind::Waiting } else { CidKind::OnHook };
    let mut fsk = FskBuffer::new(DEFAULT_CAPACITY);
    caller_id.render(&mut fsk, kind);

    let bytes: &[u8] = bytemuck::cast_slice(fsk.samples());
    fs::write(&a.out, bytes)?;
    eprintln!("{kind:?}: {} samples ({} ms) to {}", fsk.len(), fsk.len() / 8, a.out.display());
    Ok(())
}

fn spawn_printer(events: Receiver<PhoneEvent>, start: Instant) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("events".to_string())
        .spawn(move || {
            for event in events.iter() {
                print_event(start.elapsed(), event);
            }
        })?;
    Ok(handle)
}

fn simulate(a: SimulateArgs) -> Result<()> {
    let config = a.card.config(CardKind::LineJack);
    let sim = Arc::new(SimCard::new(CardKind::LineJack, config.dsp_base, config.xilinx_base));
    let card = Arc::new(Card::with_system_clock(sim.clone(), config.clone())?);
    card.set_pstn_ring_cadence(Cadence::single(a.on_ms, a.off_ms), CadenceArm::Always)?;

    let start = Instant::now();
    let printer = spawn_printer(card.events()?, start)?;
    let timer = TimerThread::spawn(card.clone(), config.tick_period())?;

    sim.set_line_voltage(true);
    for ring in 0..a.rings {
        sim.set_ring_line(true);
        thread::sleep(Duration::from_millis(a.on_ms as u64));
        sim.set_ring_line(false);
        if ring == 0 && a.caller_id {
            sim.raise_caller_id();
        }
        thread::sleep(Duration::from_millis(a.off_ms as u64));
    }

    print_note(start.elapsed(), "answer");
    card.set_pstn_state(DaaMode::Conversation)?;
    thread::sleep(Duration::from_millis(500));

    print_note(start.elapsed(), "far end hangs up");
    sim.set_line_voltage(false);
    thread::sleep(Duration::from_millis(config.winktime_ms as u64 + 200));
    print_note(start.elapsed(), &format!("DAA {:?}", card.pstn_state()?));

    timer.stop();
    drop(card);
    if printer.join().is_err() {
        warn!("event printer panicked");
    }
    Ok(())
}

fn monitor(a: MonitorArgs) -> Result<()> {
    let io = Arc::new(RawPortIo::open(&[(Window::Dsp, a.dsp_base), (Window::Xilinx, a.xilinx_base)])?);
    let config = CardConfig {
        dsp_base: a.dsp_base,
        xilinx_base: a.xilinx_base,
        ..a.card.config(a.kind.into())
    };
    let card = Arc::new(Card::with_system_clock(io, config.clone())?);
    let events = card.events()?;

    let _timer = TimerThread::spawn_with(card.clone(), config.tick_period(), || {
        if let Err(e) = promote_current_thread_to_real_time(0, 8000) {
            warn!("timer stays at normal priority: {e:?}");
        }
    })?;

    let start = Instant::now();
    for event in events.iter() {
        print_event(start.elapsed(), event);
    }
    Ok(())
}
