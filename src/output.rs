use std::io::{self, Write};

use serde::Serialize;

use crate::availability::ScheduleDecision;
use crate::domain::{ArtifactState, HourSlot};
use crate::workflow::RunReport;

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub slot: HourSlot,
    pub state: ArtifactState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub slot: HourSlot,
    pub url: String,
    pub available: bool,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_decision(decision: &ScheduleDecision) -> io::Result<()> {
        Self::print_json(decision)
    }

    pub fn print_status(entries: &[StatusEntry]) -> io::Result<()> {
        Self::print_json(&entries)
    }

    pub fn print_probe(result: &ProbeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
