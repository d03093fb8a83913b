//! Daily bandwidth accumulation from instantaneous rate samples.
//!
//! Every device-collector tick reports a rate in Mbps per device. Volume is
//! integrated per subject per UTC day as `MB = Mbps × seconds / 8` over the
//! time since the previous sample of the same day. The first sample of a day
//! only sets the clock, and a gap longer than [`GAP_THRESHOLD_SECS`] is
//! dropped. Both cases lose a little traffic; the totals are approximations.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use meshvista_storage::{format_ts, parse_ts};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

/// Samples further apart than this are not integrated.
pub const GAP_THRESHOLD_SECS: f64 = 600.0;

/// Who the accumulated volume belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthSubject {
    Device(i64),
    /// Whole-network total.
    Network,
}

impl BandwidthSubject {
    /// Value of the `device_id` column; `0` marks the network-wide row.
    pub fn device_id(self) -> i64 {
        match self {
            Self::Device(id) => id,
            Self::Network => 0,
        }
    }

    fn from_device_id(id: i64) -> Self {
        if id == 0 {
            Self::Network
        } else {
            Self::Device(id)
        }
    }
}

/// One `(network, subject, day)` accumulator row.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBandwidth {
    pub network_name: String,
    pub subject: BandwidthSubject,
    pub date: NaiveDate,
    pub download_mb: f64,
    pub upload_mb: f64,
    pub last_collection_time: Option<DateTime<Utc>>,
}

/// What [`DailyBandwidth::apply`] did with a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// No previous sample today; clock started, nothing added.
    First,
    /// Too long since the previous sample; clock advanced, nothing added.
    Gap { seconds: f64 },
    /// Older than the previous sample; ignored entirely.
    OutOfOrder { seconds: f64 },
    Added {
        download_mb: f64,
        upload_mb: f64,
        seconds: f64,
        /// Longer than twice the expected interval but still integrated.
        late: bool,
    },
}

impl DailyBandwidth {
    pub fn new(
        network_name: impl Into<String>,
        subject: BandwidthSubject,
        date: NaiveDate,
    ) -> Self {
        Self {
            network_name: network_name.into(),
            subject,
            date,
            download_mb: 0.0,
            upload_mb: 0.0,
            last_collection_time: None,
        }
    }

    /// Integrate one rate sample taken at `at`.
    pub fn apply(
        &mut self,
        down_mbps: f64,
        up_mbps: f64,
        at: DateTime<Utc>,
        expected_interval: Duration,
    ) -> SampleOutcome {
        let Some(last) = self.last_collection_time else {
            self.last_collection_time = Some(at);
            return SampleOutcome::First;
        };

        let seconds = (at - last).num_milliseconds() as f64 / 1000.0;
        if seconds < 0.0 {
            return SampleOutcome::OutOfOrder { seconds };
        }

        self.last_collection_time = Some(at);
        if seconds > GAP_THRESHOLD_SECS {
            return SampleOutcome::Gap { seconds };
        }

        let download_mb = down_mbps * seconds / 8.0;
        let upload_mb = up_mbps * seconds / 8.0;
        self.download_mb += download_mb;
        self.upload_mb += upload_mb;
        SampleOutcome::Added {
            download_mb,
            upload_mb,
            seconds,
            late: seconds > 2.0 * expected_interval.as_secs_f64(),
        }
    }
}

/// Load the accumulator row for `(network, subject, date)`.
pub fn load(
    conn: &Connection,
    network_name: &str,
    subject: BandwidthSubject,
    date: NaiveDate,
) -> rusqlite::Result<Option<DailyBandwidth>> {
    conn.query_row(
        "SELECT network_name, device_id, download_mb, upload_mb, last_collection_time
         FROM daily_bandwidth
         WHERE network_name = ?1 AND device_id = ?2 AND date = ?3",
        params![network_name, subject.device_id(), date.to_string()],
        |row| {
            let last: Option<String> = row.get(4)?;
            Ok(DailyBandwidth {
                network_name: row.get(0)?,
                subject: BandwidthSubject::from_device_id(row.get(1)?),
                date,
                download_mb: row.get(2)?,
                upload_mb: row.get(3)?,
                last_collection_time: last.as_deref().and_then(parse_ts),
            })
        },
    )
    .optional()
}

fn save(conn: &Connection, record: &DailyBandwidth, now: DateTime<Utc>) -> rusqlite::Result<()> {
    let now = format_ts(now);
    conn.execute(
        "INSERT INTO daily_bandwidth
             (network_name, device_id, date, download_mb, upload_mb,
              last_collection_time, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(network_name, device_id, date) DO UPDATE SET
             download_mb = excluded.download_mb,
             upload_mb = excluded.upload_mb,
             last_collection_time = excluded.last_collection_time,
             updated_at = excluded.updated_at",
        params![
            record.network_name,
            record.subject.device_id(),
            record.date.to_string(),
            record.download_mb,
            record.upload_mb,
            record.last_collection_time.map(format_ts),
            now,
        ],
    )?;
    Ok(())
}

/// Apply one rate sample to the subject's accumulator for the UTC day of `at`.
///
/// Both rates must be present; otherwise nothing is read or written and
/// `None` is returned. Callers make exactly one call per real observation.
pub fn accumulate(
    conn: &Connection,
    network_name: &str,
    subject: BandwidthSubject,
    down_mbps: Option<f64>,
    up_mbps: Option<f64>,
    at: DateTime<Utc>,
    expected_interval: Duration,
) -> rusqlite::Result<Option<SampleOutcome>> {
    let (Some(down), Some(up)) = (down_mbps, up_mbps) else {
        return Ok(None);
    };

    let date = at.date_naive();
    let mut record = load(conn, network_name, subject, date)?
        .unwrap_or_else(|| DailyBandwidth::new(network_name, subject, date));
    let outcome = record.apply(down, up, at, expected_interval);

    let device_id = subject.device_id();
    match outcome {
        SampleOutcome::OutOfOrder { seconds } => {
            warn!(
                network = network_name,
                device_id,
                seconds,
                "bandwidth sample out of order, ignored"
            );
            return Ok(Some(outcome));
        }
        SampleOutcome::Gap { seconds } => {
            info!(
                network = network_name,
                device_id,
                seconds,
                "bandwidth sample gap, not accumulated"
            );
        }
        SampleOutcome::Added { seconds, late: true, .. } => {
            warn!(
                network = network_name,
                device_id,
                seconds,
                expected_secs = expected_interval.as_secs(),
                "late bandwidth sample"
            );
        }
        SampleOutcome::Added { .. } | SampleOutcome::First => {
            debug!(network = network_name, device_id, ?outcome, "bandwidth sample applied");
        }
    }

    save(conn, &record, at)?;
    Ok(Some(outcome))
}
