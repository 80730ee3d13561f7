//! Pinger output classification.
//!
//! fping's line format drifted across versions: the redirect marker moved
//! from line suffix (pre-3.11) to line prefix (3.11+), and 5.0 started
//! emitting per-packet failure lines next to the aggregate statistics. The
//! classifier accepts all of these without configuration.
//!
//! Classification is a pure function over a single line; it carries no host
//! state. Host membership, index bounds and accounting are applied by
//! [`crate::stats::Accumulator`] dispatching on the returned tag.

/// Marker fping inserts when an echo reply came from a different address.
const REDIRECT_MARKER: &str = " [<-";

/// One classified output line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Acknowledgment of an individual echo request: `<addr> : [<idx>], ...`.
    ///
    /// `timed_out` marks the explicit per-packet failure lines fping emits
    /// since 5.0; they share the acknowledgment shape but must not be
    /// credited.
    Reply {
        addr: String,
        index: i64,
        timed_out: bool,
    },
    /// Per-host summary: `<addr> : <v0> <v1> ...` with a non-numeric
    /// placeholder for lost packets. Values are milliseconds.
    Summary {
        addr: String,
        samples: Vec<Option<f64>>,
    },
    /// Link-layer duplicate (`duplicate for ...`), never counted.
    Duplicate,
    /// Redirected response dropped because redirects are disallowed.
    RedirectDenied,
    /// Redirect marker without its closing bracket.
    Malformed,
    /// No recognized shape; discarded without side effects.
    Unrecognized,
}

/// Classify one raw output line.
///
/// Redirect normalization happens first: a well-formed marker is either
/// stripped (redirects allowed — the line then counts for the original
/// target) or the whole line is dropped (treated as no response).
pub fn parse_line(raw: &str, allow_redirect: bool) -> ParsedLine {
    let line = match normalize_redirect(raw, allow_redirect) {
        Normalized::Clean(line) => line,
        Normalized::Denied => return ParsedLine::RedirectDenied,
        Normalized::Malformed => return ParsedLine::Malformed,
    };

    let Some(addr_end) = line.find(' ') else {
        return ParsedLine::Unrecognized;
    };
    let addr = &line[..addr_end];
    if addr.is_empty() {
        return ParsedLine::Unrecognized;
    }

    let Some(sep) = line.find(" : ") else {
        return ParsedLine::Unrecognized;
    };

    // NIC bonding produces lines like
    // `192.168.1.2 : duplicate for [0], 96 bytes, 0.19 ms`
    if line.contains("duplicate for") {
        return ParsedLine::Duplicate;
    }

    let payload = &line[sep + 3..];

    if let Some(rest) = payload.strip_prefix('[') {
        let Some(index) = leading_integer(rest) else {
            return ParsedLine::Unrecognized;
        };
        ParsedLine::Reply {
            addr: addr.to_string(),
            index,
            timed_out: payload.contains(" timed out "),
        }
    } else {
        let samples = payload
            .split_whitespace()
            .map(|token| token.parse::<f64>().ok())
            .collect();
        ParsedLine::Summary {
            addr: addr.to_string(),
            samples,
        }
    }
}

enum Normalized {
    Clean(String),
    Denied,
    Malformed,
}

/// Strip or reject the redirect marker `" [<- <address>]"`.
///
/// The marker appears as a suffix before fping 3.11:
/// `192.168.1.1 : [0], 84 bytes, 0.61 ms (0.61 avg, 0% loss) [<- 192.168.1.2]`
/// and as a prefix since 3.11:
/// ` [<- 192.168.1.2]192.168.1.1 : [0], 84 bytes, 0.65 ms (0.65 avg, 0% loss)`
fn normalize_redirect(raw: &str, allow_redirect: bool) -> Normalized {
    let Some(start) = raw.find(REDIRECT_MARKER) else {
        return Normalized::Clean(raw.to_string());
    };

    let Some(end) = raw[start..].find(']') else {
        tracing::warn!(
            line = raw,
            "ignoring a pinger response with unexpected syntax: \"]\" after \" [<-\" was expected"
        );
        return Normalized::Malformed;
    };

    if !allow_redirect {
        tracing::debug!(line = raw, "treating redirected response as target host down");
        return Normalized::Denied;
    }

    tracing::debug!(line = raw, "treating redirected response as target host up");

    let mut line = String::with_capacity(raw.len());
    line.push_str(&raw[..start]);
    line.push_str(&raw[start + end + 1..]);
    Normalized::Clean(line)
}

/// Parse the integer at the start of `s`, stopping at the first non-digit.
fn leading_integer(s: &str) -> Option<i64> {
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|v| sign * v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_line() {
        let line = "8.8.8.8 : [0], 84 bytes, 0.61 ms (0.61 avg, 0% loss)";
        assert_eq!(
            parse_line(line, false),
            ParsedLine::Reply {
                addr: "8.8.8.8".to_string(),
                index: 0,
                timed_out: false,
            }
        );
    }

    #[test]
    fn test_reply_line_timed_out() {
        let line = "7.7.7.7 : [1], timed out (NaN avg, 100% loss)";
        assert_eq!(
            parse_line(line, false),
            ParsedLine::Reply {
                addr: "7.7.7.7".to_string(),
                index: 1,
                timed_out: true,
            }
        );
    }

    #[test]
    fn test_summary_line_with_placeholder() {
        let line = "8.8.8.8 : 91.7 37.0 29.2 - 36.8";
        match parse_line(line, false) {
            ParsedLine::Summary { addr, samples } => {
                assert_eq!(addr, "8.8.8.8");
                assert_eq!(
                    samples,
                    vec![Some(91.7), Some(37.0), Some(29.2), None, Some(36.8)]
                );
            }
            other => panic!("expected summary, got {other:?}"),
        }
    }

    #[test]
    fn test_redirect_suffix_denied() {
        let line = "8.8.8.8 : [0], 84 bytes, 0.61 ms (0.61 avg, 0% loss) [<- 192.168.1.2]";
        assert_eq!(parse_line(line, false), ParsedLine::RedirectDenied);
    }

    #[test]
    fn test_redirect_suffix_allowed() {
        let line = "8.8.8.8 : [0], 84 bytes, 0.61 ms (0.61 avg, 0% loss) [<- 192.168.1.2]";
        assert_eq!(
            parse_line(line, true),
            ParsedLine::Reply {
                addr: "8.8.8.8".to_string(),
                index: 0,
                timed_out: false,
            }
        );
    }

    #[test]
    fn test_redirect_prefix_matches_suffix_form() {
        let prefix = " [<- 1.2.3.4]8.8.8.8 : [0], 84 bytes, 0.65 ms (0.65 avg, 0% loss)";
        let suffix = "8.8.8.8 : [0], 84 bytes, 0.65 ms (0.65 avg, 0% loss) [<- 1.2.3.4]";
        assert_eq!(parse_line(prefix, true), parse_line(suffix, true));
    }

    #[test]
    fn test_redirect_missing_bracket_is_malformed() {
        let line = "8.8.8.8 : [0], 84 bytes, 0.61 ms [<- 192.168.1.2";
        assert_eq!(parse_line(line, true), ParsedLine::Malformed);
        assert_eq!(parse_line(line, false), ParsedLine::Malformed);
    }

    #[test]
    fn test_duplicate_line() {
        let line = "192.168.1.2 : duplicate for [0], 96 bytes, 0.19 ms";
        assert_eq!(parse_line(line, false), ParsedLine::Duplicate);
    }

    #[test]
    fn test_line_without_separator_unrecognized() {
        assert_eq!(parse_line("usage: fping [options]", false), ParsedLine::Unrecognized);
        assert_eq!(parse_line("", false), ParsedLine::Unrecognized);
        assert_eq!(parse_line("justoneword", false), ParsedLine::Unrecognized);
    }

    #[test]
    fn test_bracket_without_number_unrecognized() {
        assert_eq!(
            parse_line("8.8.8.8 : [junk], 84 bytes", false),
            ParsedLine::Unrecognized
        );
    }

    #[test]
    fn test_negative_index_preserved_for_range_check() {
        assert_eq!(
            parse_line("8.8.8.8 : [-1], 84 bytes", false),
            ParsedLine::Reply {
                addr: "8.8.8.8".to_string(),
                index: -1,
                timed_out: false,
            }
        );
    }

    #[test]
    fn test_ipv6_address_line() {
        let line = "2001:4860:4860::8888 : [2], 64 bytes, 11.2 ms (11.2 avg, 0% loss)";
        assert_eq!(
            parse_line(line, false),
            ParsedLine::Reply {
                addr: "2001:4860:4860::8888".to_string(),
                index: 2,
                timed_out: false,
            }
        );
    }
}
