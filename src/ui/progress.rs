use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Bar over the planned run time. Positions are milliseconds.
pub fn create_run_progress_bar(planned: Duration) -> ProgressBar {
    let pb = ProgressBar::new(planned.as_millis() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("▕{bar:25}▏ {percent:>3}% • {elapsed_precise} • {wide_msg}")
            .expect("Invalid progress template")
            .progress_chars("█░ "),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_progress_bar_tracks_milliseconds() {
        let pb = create_run_progress_bar(Duration::from_secs(120));
        assert_eq!(pb.length(), Some(120_000));
        pb.set_position(60_000);
        assert_eq!(pb.position(), 60_000);
        pb.finish_and_clear();
    }
}
