//! Parsing helpers for the bollard adapter's build-progress stream and
//! healthcheck-presence inspection. Pulled out of the adapter itself so they
//! can be unit tested against literal sample lines without a daemon.

use super::BuildProgressLine;

/// Parses a single line of Docker's legacy build-progress JSON stream
/// status text, e.g. `"Step 3/7 : RUN cargo build"`. Returns `None` for
/// lines that are not step headers (most of them, since the bulk of the
/// stream is command stdout).
pub fn parse_build_step_line(line: &str) -> Option<BuildProgressLine> {
    let rest = line.strip_prefix("Step ")?;
    let (counter, label) = rest.split_once(" : ")?;
    let (step, total) = counter.split_once('/')?;
    Some(BuildProgressLine {
        step: step.trim().parse().ok()?,
        total: total.trim().parse().ok()?,
        label: label.trim().to_owned(),
    })
}

/// Whether a line announces a completed build, e.g.
/// `"Successfully built 4b2d4588."`
pub fn is_build_success_line(line: &str) -> bool {
    line.trim_start().starts_with("Successfully built ")
}

/// Parses the `Healthcheck` field of a container inspect response body
/// (already reduced to the raw JSON text of that field) to decide whether a
/// healthcheck is declared at all. Docker represents "no healthcheck" as a
/// JSON `null`; anything else (including `{}`) counts as present.
pub fn healthcheck_is_present(raw_healthcheck_field: &str) -> bool {
    raw_healthcheck_field.trim() != "null" && !raw_healthcheck_field.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_step_header() {
        let parsed = parse_build_step_line("Step 3/7 : RUN cargo build").unwrap();
        assert_eq!(parsed.step, 3);
        assert_eq!(parsed.total, 7);
        assert_eq!(parsed.label, "RUN cargo build");
    }

    #[test]
    fn ignores_non_header_lines() {
        assert!(parse_build_step_line("   ---> Running in 8f3c1a2b9d4e").is_none());
        assert!(parse_build_step_line("Compiling taskforge v0.1.0").is_none());
    }

    #[test]
    fn detects_success_line() {
        assert!(is_build_success_line("Successfully built 4b2d4588"));
        assert!(!is_build_success_line("Step 1/7 : FROM rust:1.80"));
    }

    #[test]
    fn detects_healthcheck_presence() {
        assert!(!healthcheck_is_present("null"));
        assert!(!healthcheck_is_present(""));
        assert!(healthcheck_is_present(r#"{"Test":["CMD","true"]}"#));
    }
}
