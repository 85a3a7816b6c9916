//! Recording loader.
//!
//! The pipeline consumes one channel of a multi-channel recording as a
//! sequence of [`Sample`]s. Recordings arrive as exports from the acquisition
//! toolchain in one of two shapes, chosen by file extension:
//!
//! - **CSV** -- a header `time,<ch0>,<ch1>,...` followed by one row per
//!   sample; `time` is in seconds. Blank lines and `#` comments are skipped.
//! - **JSON** -- `{"sampling_rate": 600.6, "times": [...], "channels":
//!   [{"name": "...", "data": [...]}]}`. `times` may be omitted when
//!   `sampling_rate` is given, in which case sample `i` is at `i / rate`.
//!
//! Times are converted to integer milliseconds by truncation. Negative times
//! and non-finite values are rejected here, since the cache refuses them.

use std::path::{Path, PathBuf};

use brainwaves_types::Sample;
use serde::Deserialize;

/// Largest magnitude of a millisecond timestamp that survives the trip
/// through `f64` exactly (2^53).
const MAX_EXACT_MS: f64 = 9_007_199_254_740_992.0;

/// Errors that can occur while loading a recording.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The file could not be read.
    #[error("failed to read recording {path}: {source}")]
    Io {
        /// The recording path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The file extension does not name a supported format.
    #[error("unsupported recording format for {0} (expected .csv or .json)")]
    UnsupportedFormat(PathBuf),

    /// A CSV line could not be parsed.
    #[error("line {line}: {message}")]
    Csv {
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// The JSON document could not be parsed.
    #[error("invalid recording JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The recording's arrays disagree or contain unusable values.
    #[error("invalid recording: {0}")]
    Invalid(String),

    /// The requested channel does not exist.
    #[error("channel {0} not found in recording")]
    UnknownChannel(String),

    /// The selected channel holds no samples.
    #[error("recording has no samples")]
    Empty,
}

/// Which channel of a recording to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChannelSelector {
    /// Zero-based channel position.
    Index(usize),
    /// Channel name as it appears in the recording.
    Name(String),
}

impl ChannelSelector {
    /// Interpret `raw` as an index if it is a number, else as a name.
    pub fn parse(raw: &str) -> Self {
        raw.trim()
            .parse::<usize>()
            .map_or_else(|_| Self::Name(raw.trim().to_owned()), Self::Index)
    }
}

impl Default for ChannelSelector {
    fn default() -> Self {
        Self::Index(0)
    }
}

impl core::fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{i}"),
            Self::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// Anything that can produce the samples to migrate.
pub trait SampleSource {
    /// Load all samples, ordered as they should be written.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the samples cannot be produced.
    fn load(&self) -> Result<Vec<Sample>, SourceError>;
}

/// A decoded multi-channel recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// Sample times in seconds from recording start.
    pub times: Vec<f64>,
    /// Channel names, parallel to `channels`.
    pub channel_names: Vec<String>,
    /// Channel data; every channel has `times.len()` values.
    pub channels: Vec<Vec<f64>>,
}

#[derive(Deserialize)]
struct RecordingFile {
    #[serde(default)]
    sampling_rate: Option<f64>,
    #[serde(default)]
    times: Option<Vec<f64>>,
    channels: Vec<ChannelFile>,
}

#[derive(Deserialize)]
struct ChannelFile {
    name: String,
    data: Vec<f64>,
}

impl Recording {
    /// Read and decode the recording at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file is missing, unreadable, of an
    /// unknown format, or malformed.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let parse: fn(&str) -> Result<Self, SourceError> = match extension.as_deref() {
            Some("csv") => Self::parse_csv,
            Some("json") => Self::parse_json,
            _ => return Err(SourceError::UnsupportedFormat(path.to_path_buf())),
        };
        let contents = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse(&contents)
    }

    /// Decode a CSV export.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Csv`] for a missing header, a ragged row, or
    /// a field that is not a number.
    pub fn parse_csv(contents: &str) -> Result<Self, SourceError> {
        let mut lines = contents
            .lines()
            .enumerate()
            .map(|(i, line)| (i.saturating_add(1), line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let (header_line, header) = lines.next().ok_or(SourceError::Csv {
            line: 1,
            message: "missing header".to_owned(),
        })?;
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let Some((_, channel_names)) = columns.split_first() else {
            return Err(SourceError::Csv {
                line: header_line,
                message: "empty header".to_owned(),
            });
        };
        if channel_names.is_empty() {
            return Err(SourceError::Csv {
                line: header_line,
                message: "header has a time column but no channels".to_owned(),
            });
        }

        let mut recording = Self {
            times: Vec::new(),
            channel_names: channel_names.iter().map(|s| (*s).to_owned()).collect(),
            channels: vec![Vec::new(); channel_names.len()],
        };

        for (line, row) in lines {
            let fields = row
                .split(',')
                .map(|field| {
                    field.trim().parse::<f64>().map_err(|e| SourceError::Csv {
                        line,
                        message: format!("{:?} is not a number: {e}", field.trim()),
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            let Some((time, values)) = fields.split_first() else {
                continue;
            };
            if values.len() != recording.channels.len() {
                return Err(SourceError::Csv {
                    line,
                    message: format!(
                        "expected {} fields, found {}",
                        columns.len(),
                        fields.len()
                    ),
                });
            }
            recording.times.push(*time);
            for (channel, value) in recording.channels.iter_mut().zip(values) {
                channel.push(*value);
            }
        }

        Ok(recording)
    }

    /// Decode a JSON export.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Json`] if the document does not parse and
    /// [`SourceError::Invalid`] if times cannot be determined or a channel's
    /// length differs from the time axis.
    pub fn parse_json(contents: &str) -> Result<Self, SourceError> {
        let file: RecordingFile = serde_json::from_str(contents)?;
        let len = file.channels.first().map_or(0, |c| c.data.len());

        let times = match (file.times, file.sampling_rate) {
            (Some(times), _) => times,
            (None, Some(rate)) if rate.is_finite() && rate > 0.0 => {
                let mut times = Vec::with_capacity(len);
                let mut index = 0.0_f64;
                for _ in 0..len {
                    times.push(index / rate);
                    index += 1.0;
                }
                times
            }
            (None, Some(rate)) => {
                return Err(SourceError::Invalid(format!(
                    "sampling_rate must be positive, got {rate}"
                )));
            }
            (None, None) => {
                return Err(SourceError::Invalid(
                    "either times or sampling_rate is required".to_owned(),
                ));
            }
        };

        let mut channel_names = Vec::with_capacity(file.channels.len());
        let mut channels = Vec::with_capacity(file.channels.len());
        for channel in file.channels {
            if channel.data.len() != times.len() {
                return Err(SourceError::Invalid(format!(
                    "channel {:?} has {} values but there are {} times",
                    channel.name,
                    channel.data.len(),
                    times.len()
                )));
            }
            channel_names.push(channel.name);
            channels.push(channel.data);
        }

        Ok(Self {
            times,
            channel_names,
            channels,
        })
    }

    /// Samples of the selected channel, timestamped in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnknownChannel`] if the selector matches no
    /// channel, [`SourceError::Empty`] if the channel has no samples, and
    /// [`SourceError::Invalid`] if a time is negative, not finite or out of
    /// range, or if a value is not finite.
    pub fn channel_samples(&self, selector: &ChannelSelector) -> Result<Vec<Sample>, SourceError> {
        let index = match selector {
            ChannelSelector::Index(i) => Some(*i),
            ChannelSelector::Name(name) => self.channel_names.iter().position(|n| n == name),
        };
        let data = index
            .and_then(|i| self.channels.get(i))
            .ok_or_else(|| SourceError::UnknownChannel(selector.to_string()))?;
        if data.is_empty() {
            return Err(SourceError::Empty);
        }

        self.times
            .iter()
            .zip(data)
            .map(|(time, value)| {
                if !value.is_finite() {
                    return Err(SourceError::Invalid(format!(
                        "non-finite sample value {value} at {time}s"
                    )));
                }
                seconds_to_millis(*time)
                    .map(|ms| Sample::new(ms, *value))
                    .ok_or_else(|| SourceError::Invalid(format!("unusable sample time {time}s")))
            })
            .collect()
    }
}

/// Convert seconds to whole milliseconds, truncating toward zero.
///
/// Returns `None` for negative, non-finite or out-of-range times.
pub fn seconds_to_millis(seconds: f64) -> Option<i64> {
    if seconds < 0.0 {
        return None;
    }
    let ms = (seconds * 1000.0).trunc();
    if !ms.is_finite() || ms > MAX_EXACT_MS {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(ms as i64)
}

/// A recording file on disk plus the channel to take from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSource {
    /// Path to the recording export.
    pub path: PathBuf,
    /// Channel to migrate.
    pub channel: ChannelSelector,
}

impl RecordingSource {
    /// Create a source for `channel` of the recording at `path`.
    pub fn new(path: impl Into<PathBuf>, channel: ChannelSelector) -> Self {
        Self {
            path: path.into(),
            channel,
        }
    }
}

impl SampleSource for RecordingSource {
    fn load(&self) -> Result<Vec<Sample>, SourceError> {
        let recording = Recording::load(&self.path)?;
        tracing::info!(
            path = %self.path.display(),
            channels = recording.channels.len(),
            samples = recording.times.len(),
            "Recording loaded"
        );
        recording.channel_samples(&self.channel)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    const CSV: &str = "\
# exported from sample_audvis_raw
time,MEG 0113,MEG 0112
0.0,1.5,-1.0
1.0,2.5,-2.0

2.0,3.5,-3.0
";

    #[test]
    fn csv_first_channel_by_default() {
        let recording = Recording::parse_csv(CSV).unwrap();
        assert_eq!(recording.channel_names, vec!["MEG 0113", "MEG 0112"]);

        let samples = recording.channel_samples(&ChannelSelector::default()).unwrap();
        assert_eq!(
            samples,
            vec![Sample::new(0, 1.5), Sample::new(1000, 2.5), Sample::new(2000, 3.5)]
        );
    }

    #[test]
    fn csv_channel_by_name() {
        let recording = Recording::parse_csv(CSV).unwrap();
        let samples = recording
            .channel_samples(&ChannelSelector::Name("MEG 0112".to_owned()))
            .unwrap();
        assert_eq!(samples.last(), Some(&Sample::new(2000, -3.0)));
    }

    #[test]
    fn csv_reports_ragged_row_line() {
        let err = Recording::parse_csv("time,a,b\n0.0,1.0,2.0\n0.1,1.0\n").unwrap_err();
        match err {
            SourceError::Csv { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn csv_rejects_non_numeric_and_missing_channels() {
        assert!(Recording::parse_csv("time,a\n0.0,abc\n").is_err());
        assert!(Recording::parse_csv("time\n0.0\n").is_err());
        assert!(Recording::parse_csv("# only a comment\n").is_err());
    }

    #[test]
    fn json_with_times() {
        let json = r#"{"times":[0.0,0.001,0.0025],"channels":[{"name":"EEG 001","data":[1.0,2.0,3.0]}]}"#;
        let recording = Recording::parse_json(json).unwrap();
        let samples = recording
            .channel_samples(&ChannelSelector::Name("EEG 001".to_owned()))
            .unwrap();
        let stamps: Vec<i64> = samples.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![0, 1, 2]);
    }

    #[test]
    fn json_derives_times_from_sampling_rate() {
        let json = r#"{"sampling_rate":4.0,"channels":[{"name":"a","data":[1.0,2.0,3.0]}]}"#;
        let recording = Recording::parse_json(json).unwrap();
        assert_eq!(recording.times, vec![0.0, 0.25, 0.5]);
        let samples = recording.channel_samples(&ChannelSelector::Index(0)).unwrap();
        assert_eq!(samples.get(2), Some(&Sample::new(500, 3.0)));
    }

    #[test]
    fn json_rejects_length_mismatch_and_missing_time_axis() {
        let mismatch = r#"{"times":[0.0],"channels":[{"name":"a","data":[1.0,2.0]}]}"#;
        assert!(matches!(Recording::parse_json(mismatch), Err(SourceError::Invalid(_))));

        let no_axis = r#"{"channels":[{"name":"a","data":[1.0]}]}"#;
        assert!(matches!(Recording::parse_json(no_axis), Err(SourceError::Invalid(_))));

        assert!(matches!(Recording::parse_json("{"), Err(SourceError::Json(_))));
    }

    #[test]
    fn unknown_channel_and_empty_channel() {
        let recording = Recording::parse_csv(CSV).unwrap();
        assert!(matches!(
            recording.channel_samples(&ChannelSelector::Index(9)),
            Err(SourceError::UnknownChannel(_))
        ));

        let empty = Recording::parse_csv("time,a\n").unwrap();
        assert!(matches!(
            empty.channel_samples(&ChannelSelector::Index(0)),
            Err(SourceError::Empty)
        ));
    }

    #[test]
    fn seconds_to_millis_truncates() {
        assert_eq!(seconds_to_millis(0.0), Some(0));
        assert_eq!(seconds_to_millis(1.6659), Some(1665));
        assert_eq!(seconds_to_millis(-0.0), Some(0));
        assert_eq!(seconds_to_millis(f64::NAN), None);
        assert_eq!(seconds_to_millis(f64::INFINITY), None);
        assert_eq!(seconds_to_millis(1e300), None);
    }

    #[test]
    fn seconds_to_millis_rejects_negative_times() {
        assert_eq!(seconds_to_millis(-0.0015), None);
        assert_eq!(seconds_to_millis(-0.5), None);
        assert_eq!(seconds_to_millis(f64::NEG_INFINITY), None);
    }

    #[test]
    fn negative_time_fails_at_load() {
        let recording = Recording::parse_csv("time,a\n-0.5,1.0\n0.0,2.0\n").unwrap();
        assert!(matches!(
            recording.channel_samples(&ChannelSelector::Index(0)),
            Err(SourceError::Invalid(_))
        ));
    }

    #[test]
    fn non_finite_values_fail_at_load() {
        for value in ["NaN", "inf", "-inf"] {
            let csv = format!("time,a\n0.0,1.0\n0.001,{value}\n");
            let recording = Recording::parse_csv(&csv).unwrap();
            assert!(
                matches!(
                    recording.channel_samples(&ChannelSelector::Index(0)),
                    Err(SourceError::Invalid(_))
                ),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn channel_selector_parse() {
        assert_eq!(ChannelSelector::parse("2"), ChannelSelector::Index(2));
        assert_eq!(
            ChannelSelector::parse("MEG 0113"),
            ChannelSelector::Name("MEG 0113".to_owned())
        );
        assert_eq!(
            ChannelSelector::parse(" MEG 0113 "),
            ChannelSelector::Name("MEG 0113".to_owned())
        );
    }

    #[test]
    fn recording_source_loads_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();

        let source = RecordingSource::new(file.path(), ChannelSelector::Index(1));
        let samples = source.load().unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.first(), Some(&Sample::new(0, -1.0)));
    }

    #[test]
    fn recording_source_missing_file_and_bad_extension() {
        let missing = RecordingSource::new("/nonexistent/recording.csv", ChannelSelector::Index(0));
        assert!(matches!(missing.load(), Err(SourceError::Io { .. })));

        let fif = RecordingSource::new("sample_audvis_raw.fif", ChannelSelector::Index(0));
        assert!(matches!(fif.load(), Err(SourceError::UnsupportedFormat(_))));
    }
}
