use std::time::Duration;

use console::{style, Color};
use ixj::PhoneEvent;

fn color(event: PhoneEvent) -> Color {
    match event {
        PhoneEvent::Hookstate(true)  => Color::Green,
        PhoneEvent::Hookstate(false) => Color::Red,
        PhoneEvent::Flash            => Color::Yellow,
        PhoneEvent::PstnRing
        | PhoneEvent::PstnWink
        | PhoneEvent::CallerId       => Color::Magenta,
        PhoneEvent::FilterCadence(_)
        | PhoneEvent::FilterTrigger(_) => Color::Cyan,
        PhoneEvent::Dtmf(_)          => Color::White,
        PhoneEvent::CallerIdSent     => Color::Blue,
    }
}

fn label(event: PhoneEvent) -> String {
    match event {
        PhoneEvent::Hookstate(true)  => "OFF-HOOK".to_string(),
        PhoneEvent::Hookstate(false) => "ON-HOOK".to_string(),
        PhoneEvent::Flash            => "FLASH".to_string(),
        PhoneEvent::PstnRing         => "PSTN RING".to_string(),
        PhoneEvent::CallerId         => "PSTN CID".to_string(),
        PhoneEvent::PstnWink         => "PSTN WINK".to_string(),
        PhoneEvent::FilterCadence(n) => format!("FILTER{n} CADENCE"),
        PhoneEvent::FilterTrigger(n) => format!("FILTER{n} TRIGGER"),
        PhoneEvent::Dtmf(digit)      => format!("DTMF {digit}"),
        PhoneEvent::CallerIdSent     => "CID SENT".to_string(),
    }
}

pub(crate) fn print_event(elapsed: Duration, event: PhoneEvent) {
    eprintln!("{:>9.3} {}", elapsed.as_secs_f64(), style(label(event)).fg(color(event)));
}

pub(crate) fn print_note(elapsed: Duration, note: &str) {
    eprintln!("{:>9.3} {}", elapsed.as_secs_f64(), style(note).dim());
}
