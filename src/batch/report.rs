use super::RunSummary;

pub struct PerformanceReport {
    total_jobs: usize,
    successful: usize,
    failed: usize,
    invalid: usize,
    left_pending: usize,
    interrupted: bool,
    duration_secs: f64,
    jobs_per_minute: f64,
    success_rate: f64,
}

impl PerformanceReport {
    pub fn new(summary: &RunSummary) -> Self {
        let decided = summary.done + summary.errors;
        let duration_secs = summary.duration.as_secs_f64();

        let jobs_per_minute = if duration_secs > 0.0 {
            (decided as f64 / duration_secs) * 60.0
        } else {
            0.0
        };

        let success_rate = if decided > 0 {
            (summary.done as f64 / decided as f64) * 100.0
        } else {
            0.0
        };

        Self {
            total_jobs: summary.dispatched,
            successful: summary.done,
            failed: summary.errors,
            invalid: summary.invalid,
            left_pending: summary.left_pending,
            interrupted: summary.interrupted,
            duration_secs,
            jobs_per_minute,
            success_rate,
        }
    }

    fn format_duration(&self) -> String {
        let total_secs = self.duration_secs as u64;
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    pub fn display(&self) {
        println!("\n╔══════════════════════════════════════════════════════════╗");
        println!("║              ENRICHMENT REPORT                           ║");
        println!("╠══════════════════════════════════════════════════════════╣");
        println!("║  Dispatched:              {:>30} ║", self.total_jobs);
        println!("║  Done:                    {:>30} ║", self.successful);
        println!("║  Errors:                  {:>30} ║", self.failed);
        println!("║  Invalid identifiers:     {:>30} ║", self.invalid);
        println!("║  Left pending:            {:>30} ║", self.left_pending);
        println!(
            "║  Duration:                {:>30} ║",
            self.format_duration()
        );
        println!(
            "║  Throughput:              {:>26.2}/min ║",
            self.jobs_per_minute
        );
        println!(
            "║  Success Rate:            {:>27.1}%   ║",
            self.success_rate
        );

        let status = if self.interrupted {
            "⏹️  INTERRUPTED"
        } else if self.success_rate >= 90.0 {
            "🟢 EXCELLENT"
        } else if self.success_rate >= 75.0 {
            "🟡 GOOD"
        } else if self.success_rate >= 50.0 {
            "🟠 MODERATE"
        } else {
            "🔴 NEEDS IMPROVEMENT"
        };

        println!("║  Status:                  {:>30}║", status);
        println!("╚══════════════════════════════════════════════════════════╝\n");
    }
}
