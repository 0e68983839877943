//! End-of-run summary

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

/// Per-iteration values gathered by the loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationSummary {
    pub iteration: usize,
    /// Residual slope RMS of every sensor (arcsec), in sensor order
    pub slope_rms: Vec<f64>,
    /// Instantaneous Strehl of every science camera, in camera order
    pub strehl: Vec<f64>,
    /// Subapertures without usable signal this iteration
    pub no_signal_subaps: usize,
    /// Mirrors reconstructed from a reduced interaction matrix this iteration
    pub row_deletions: usize,
}

/// Summary written to `report.json` and printed by the binary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub sim_name: String,
    pub iterations: usize,
    /// Simulated seconds covered by the run
    pub simulated_time: f64,
    /// Residual slope RMS history keyed by WFS id
    pub residual_slope_rms: BTreeMap<u32, Vec<f64>>,
    /// Instantaneous Strehl history keyed by science id
    pub instantaneous_strehl: BTreeMap<u32, Vec<f64>>,
    pub long_exposure_strehl: BTreeMap<u32, f64>,
    pub mean_strehl: BTreeMap<u32, f64>,
    /// Modes dropped from each control matrix at calibration, keyed by DM id
    pub truncated_modes: BTreeMap<u32, usize>,
    /// Subaperture-iterations without usable signal
    pub no_signal_subaps: usize,
    /// Reconstructions that fell back to a reduced interaction matrix
    pub row_deletions: usize,
    /// Run directory, when outputs were saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl RunReport {
    pub fn new(sim_name: &str) -> Self {
        Self {
            sim_name: sim_name.to_string(),
            ..Default::default()
        }
    }

    /// Fold one iteration into the histories.
    pub fn record(&mut self, summary: &IterationSummary, wfs_ids: &[u32], science_ids: &[u32]) {
        self.iterations += 1;
        for (id, rms) in wfs_ids.iter().zip(&summary.slope_rms) {
            self.residual_slope_rms.entry(*id).or_default().push(*rms);
        }
        for (id, strehl) in science_ids.iter().zip(&summary.strehl) {
            self.instantaneous_strehl.entry(*id).or_default().push(*strehl);
        }
        self.no_signal_subaps += summary.no_signal_subaps;
        self.row_deletions += summary.row_deletions;
    }

    /// Last recorded residual RMS of one sensor
    pub fn final_slope_rms(&self, wfs: u32) -> Option<f64> {
        self.residual_slope_rms.get(&wfs).and_then(|h| h.last().copied())
    }

    /// Multi-line human-readable summary
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{}: {} iterations ({:.3} s simulated)",
            self.sim_name, self.iterations, self.simulated_time
        )];
        for (id, history) in &self.residual_slope_rms {
            if let Some(last) = history.last() {
                lines.push(format!("  WFS {id}: final residual slope RMS {last:.4}\""));
            }
        }
        for (id, strehl) in &self.long_exposure_strehl {
            let mean = self.mean_strehl.get(id).copied().unwrap_or(0.0);
            lines.push(format!(
                "  Science {id}: long-exposure Strehl {strehl:.3}, mean instantaneous {mean:.3}"
            ));
        }
        if self.no_signal_subaps > 0 || self.row_deletions > 0 {
            lines.push(format!(
                "  {} no-signal subapertures, {} reduced reconstructions",
                self.no_signal_subaps, self.row_deletions
            ));
        }
        lines.join("\n")
    }
}
