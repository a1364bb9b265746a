use chrono::{DateTime, FixedOffset};

/// One line of `logs --timestamps` output.
#[derive(Debug)]
struct LogLine<'a> {
    ts: Option<DateTime<FixedOffset>>,
    text: &'a str,
}

fn parse_lines(raw: &str) -> Vec<LogLine<'_>> {
    raw.split_inclusive('\n')
        .map(|line| match line.split_once(' ') {
            Some((prefix, rest)) => match DateTime::parse_from_rfc3339(prefix) {
                Ok(ts) => LogLine { ts: Some(ts), text: rest },
                Err(_) => LogLine { ts: None, text: line },
            },
            None => LogLine { ts: None, text: line },
        })
        .collect()
}

/// Rebuilds the combined container log from the two timestamped streams the
/// runtime CLI hands back separately.
///
/// Each stream is already ordered, so this is a two-way merge on the
/// timestamp prefix. Ties and unstamped lines favour stdout.
pub fn merge_timestamped(stdout: &str, stderr: &str) -> String {
    let out = parse_lines(stdout);
    let err = parse_lines(stderr);

    let mut merged = String::with_capacity(stdout.len() + stderr.len());
    let (mut i, mut j) = (0, 0);

    while i < out.len() || j < err.len() {
        let take_stdout = match (out.get(i), err.get(j)) {
            (Some(o), Some(e)) => match (o.ts, e.ts) {
                (Some(ot), Some(et)) => ot <= et,
                _ => true,
            },
            (Some(_), None) => true,
            (None, _) => false,
        };

        if take_stdout {
            merged.push_str(out[i].text);
            i += 1;
        } else {
            merged.push_str(err[j].text);
            j += 1;
        }
    }

    merged
}
