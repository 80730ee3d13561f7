//! Per-host response accounting.
//!
//! The accumulator owns the response bitmaps and the running statistics for
//! one probe batch. It consumes classified lines (see [`crate::parser`])
//! and dispatches on the tag; unknown hosts, out-of-range indices and
//! duplicate lines fall through without touching any state.

use std::collections::HashMap;

use serde::Serialize;

use crate::parser::ParsedLine;

/// Aggregated statistics for one probed host.
///
/// `min`, `max` and `sum` are in seconds and meaningful only when
/// `received > 0`. A host with `received == 0` answered nothing — that is a
/// valid "host down" observation, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    /// Probed address, exactly as given in the batch.
    pub addr: String,
    /// Echo requests accounted for this host.
    pub sent: u32,
    /// Echo replies credited to this host.
    pub received: u32,
    /// Fastest observed round trip, seconds.
    pub min: f64,
    /// Slowest observed round trip, seconds.
    pub max: f64,
    /// Sum of observed round trips, seconds.
    pub sum: f64,
}

impl HostStats {
    fn new(addr: String) -> Self {
        Self {
            addr,
            sent: 0,
            received: 0,
            min: 0.0,
            max: 0.0,
            sum: 0.0,
        }
    }

    /// Average round trip in seconds, undefined when nothing was received.
    pub fn avg(&self) -> Option<f64> {
        (self.received > 0).then(|| self.sum / f64::from(self.received))
    }

    /// Fraction of requests that went unanswered.
    pub fn loss(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        f64::from(self.sent - self.received) / f64::from(self.sent)
    }
}

struct HostEntry {
    stats: HostStats,
    /// One slot per echo request; index = packet sequence number.
    bitmap: Vec<bool>,
}

/// Accumulates classified pinger output for one batch.
pub struct Accumulator {
    hosts: Vec<HostEntry>,
    by_addr: HashMap<String, usize>,
    requests_count: usize,
    /// When set, a host's bitmap is cleared once its first pass completes,
    /// so the IPv6 pass is tracked as an independent sample.
    reset_after_first_pass: bool,
    recognized: usize,
}

impl Accumulator {
    /// Create an accumulator for the ordered `addrs`, expecting
    /// `requests_count` echo requests per host.
    pub fn new(addrs: &[String], requests_count: usize, reset_after_first_pass: bool) -> Self {
        let hosts: Vec<HostEntry> = addrs
            .iter()
            .map(|addr| HostEntry {
                stats: HostStats::new(addr.clone()),
                bitmap: vec![false; requests_count],
            })
            .collect();
        let by_addr = addrs
            .iter()
            .enumerate()
            .map(|(i, addr)| (addr.clone(), i))
            .collect();

        Self {
            hosts,
            by_addr,
            requests_count,
            reset_after_first_pass,
            recognized: 0,
        }
    }

    /// Number of lines that matched a known shape for a host in the batch.
    pub fn recognized(&self) -> usize {
        self.recognized
    }

    /// Dispatch one classified line.
    pub fn apply(&mut self, line: ParsedLine) {
        match line {
            ParsedLine::Reply {
                addr,
                index,
                timed_out,
            } => self.apply_reply(&addr, index, timed_out),
            ParsedLine::Summary { addr, samples } => self.apply_summary(&addr, &samples),
            ParsedLine::Duplicate
            | ParsedLine::RedirectDenied
            | ParsedLine::Malformed
            | ParsedLine::Unrecognized => {}
        }
    }

    fn apply_reply(&mut self, addr: &str, index: i64, timed_out: bool) {
        let Some(&host_idx) = self.by_addr.get(addr) else {
            tracing::debug!(addr, "discarding response for host outside the batch");
            return;
        };
        self.recognized += 1;
        let entry = &mut self.hosts[host_idx];

        if index < 0 || index >= self.requests_count as i64 {
            return;
        }
        // Explicit per-packet timeout lines share the acknowledgment shape
        // but report a miss.
        if timed_out {
            return;
        }
        entry.bitmap[index as usize] = true;
    }

    fn apply_summary(&mut self, addr: &str, samples: &[Option<f64>]) {
        let requests_count = self.requests_count;
        let reset_after_first_pass = self.reset_after_first_pass;
        let Some(&host_idx) = self.by_addr.get(addr) else {
            tracing::debug!(addr, "discarding statistics for host outside the batch");
            return;
        };
        self.recognized += 1;
        let entry = &mut self.hosts[host_idx];

        let span = requests_count.min(samples.len());
        for idx in 0..span {
            if !entry.bitmap[idx] {
                continue;
            }
            entry.stats.received += 1;
            if let Some(ms) = samples[idx] {
                let sec = ms / 1000.0;
                if entry.stats.received == 1 || entry.stats.min > sec {
                    entry.stats.min = sec;
                }
                if entry.stats.received == 1 || entry.stats.max < sec {
                    entry.stats.max = sec;
                }
                entry.stats.sum += sec;
            }
        }

        entry.stats.sent += requests_count as u32;

        // Dual-stack reconciliation: the first pass for this host has just
        // completed, and a second (IPv6) pass may follow. Its packet
        // indices restart at zero, so the bitmap must too.
        if reset_after_first_pass && entry.stats.sent as usize == requests_count {
            entry.bitmap.fill(false);
        }
    }

    /// Finish the batch and return one stats record per host, batch order.
    pub fn finish(self) -> Vec<HostStats> {
        self.hosts.into_iter().map(|entry| entry.stats).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    fn batch(addrs: &[&str], requests: usize) -> Accumulator {
        let addrs: Vec<String> = addrs.iter().map(|s| s.to_string()).collect();
        Accumulator::new(&addrs, requests, false)
    }

    #[test]
    fn test_summary_folds_marked_indices() {
        let mut acc = batch(&["8.8.8.8"], 5);
        for idx in [0, 1, 2, 4] {
            acc.apply(ParsedLine::Reply {
                addr: "8.8.8.8".to_string(),
                index: idx,
                timed_out: false,
            });
        }
        acc.apply(parse_line("8.8.8.8 : 91.7 37.0 29.2 - 36.8", false));

        let stats = acc.finish().remove(0);
        assert_eq!(stats.sent, 5);
        assert_eq!(stats.received, 4);
        assert!((stats.min - 0.0292).abs() < 1e-9);
        assert!((stats.max - 0.0917).abs() < 1e-9);
        assert!((stats.sum - (91.7 + 37.0 + 29.2 + 36.8) / 1000.0).abs() < 1e-9);

        let avg = stats.avg().unwrap();
        assert!(stats.min <= avg && avg <= stats.max);
    }

    #[test]
    fn test_sent_accrues_even_when_all_lost() {
        let mut acc = batch(&["7.7.7.7"], 3);
        acc.apply(parse_line("7.7.7.7 : - - -", false));

        let stats = acc.finish().remove(0);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.avg(), None);
        assert!((stats.loss() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_host_mutates_nothing() {
        let mut acc = batch(&["8.8.8.8"], 3);
        acc.apply(ParsedLine::Reply {
            addr: "9.9.9.9".to_string(),
            index: 0,
            timed_out: false,
        });
        acc.apply(ParsedLine::Summary {
            addr: "9.9.9.9".to_string(),
            samples: vec![Some(1.0), Some(1.0), Some(1.0)],
        });

        assert_eq!(acc.recognized(), 0);
        let stats = acc.finish().remove(0);
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.received, 0);
    }

    #[test]
    fn test_duplicate_line_mutates_nothing() {
        let mut acc = batch(&["192.168.1.2"], 3);
        acc.apply(parse_line(
            "192.168.1.2 : duplicate for [0], 96 bytes, 0.19 ms",
            false,
        ));

        assert_eq!(acc.recognized(), 0);
        let stats = acc.finish().remove(0);
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.received, 0);
    }

    #[test]
    fn test_out_of_range_index_ignored() {
        let mut acc = batch(&["8.8.8.8"], 3);
        acc.apply(ParsedLine::Reply {
            addr: "8.8.8.8".to_string(),
            index: 3,
            timed_out: false,
        });
        acc.apply(ParsedLine::Reply {
            addr: "8.8.8.8".to_string(),
            index: -1,
            timed_out: false,
        });
        acc.apply(ParsedLine::Summary {
            addr: "8.8.8.8".to_string(),
            samples: vec![Some(1.0), Some(1.0), Some(1.0)],
        });

        let stats = acc.finish().remove(0);
        assert_eq!(stats.received, 0);
    }

    #[test]
    fn test_timed_out_reply_not_credited() {
        let mut acc = batch(&["7.7.7.7"], 3);
        acc.apply(parse_line(
            "7.7.7.7 : [0], timed out (NaN avg, 100% loss)",
            false,
        ));
        acc.apply(ParsedLine::Summary {
            addr: "7.7.7.7".to_string(),
            samples: vec![Some(1.0), None, None],
        });

        let stats = acc.finish().remove(0);
        assert_eq!(stats.received, 0);
    }

    #[test]
    fn test_dual_stack_reset_tracks_second_pass_independently() {
        let addrs = vec!["8.8.8.8".to_string()];
        let mut acc = Accumulator::new(&addrs, 2, true);

        // IPv4 pass: both packets answered.
        acc.apply(parse_line("8.8.8.8 : [0], 64 bytes, 9.4 ms", false));
        acc.apply(parse_line("8.8.8.8 : [1], 64 bytes, 8.7 ms", false));
        acc.apply(parse_line("8.8.8.8 : 9.4 8.7", false));

        // IPv6 pass: nothing answered. Without the reset the stale bitmap
        // would credit these as received.
        acc.apply(parse_line("8.8.8.8 : - -", false));

        let stats = acc.finish().remove(0);
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.received, 2);
    }

    #[test]
    fn test_no_reset_without_dual_stack() {
        let addrs = vec!["8.8.8.8".to_string()];
        let mut acc = Accumulator::new(&addrs, 2, false);

        acc.apply(parse_line("8.8.8.8 : [0], 64 bytes, 9.4 ms", false));
        acc.apply(parse_line("8.8.8.8 : [1], 64 bytes, 8.7 ms", false));
        acc.apply(parse_line("8.8.8.8 : 9.4 8.7", false));
        // A second summary with a stale bitmap keeps crediting; this is the
        // single-binary case where no second pass can exist.
        acc.apply(parse_line("8.8.8.8 : 9.0 8.0", false));

        let stats = acc.finish().remove(0);
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.received, 4);
    }

    #[test]
    fn test_received_never_exceeds_sent() {
        let mut acc = batch(&["8.8.8.8"], 3);
        acc.apply(parse_line("8.8.8.8 : [0], 64 bytes, 1.0 ms", false));
        acc.apply(parse_line("8.8.8.8 : 1.0 - -", false));

        let stats = acc.finish().remove(0);
        assert!(stats.received <= stats.sent);
    }

    #[test]
    fn test_short_summary_bounds_walk() {
        let mut acc = batch(&["8.8.8.8"], 5);
        for idx in 0..5 {
            acc.apply(ParsedLine::Reply {
                addr: "8.8.8.8".to_string(),
                index: idx,
                timed_out: false,
            });
        }
        // Truncated statistics line: only two tokens for five requests.
        acc.apply(parse_line("8.8.8.8 : 1.0 2.0", false));

        let stats = acc.finish().remove(0);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.sent, 5);
    }
}
