//! Resource accounting for executed jobs: child rusage deltas, wall-clock
//! runtime, and the byte total of the working directory.

use std::path::Path;

use serde::Serialize;

/// The 16 rusage counters of all child processes, read via
/// `getrusage(RUSAGE_CHILDREN)` at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RusageSnapshot {
    pub utime: f64,
    pub stime: f64,
    pub maxrss: i64,
    pub ixrss: i64,
    pub idrss: i64,
    pub isrss: i64,
    pub minflt: i64,
    pub majflt: i64,
    pub nswap: i64,
    pub inblock: i64,
    pub oublock: i64,
    pub msgsnd: i64,
    pub msgrcv: i64,
    pub nsignals: i64,
    pub nvcsw: i64,
    pub nivcsw: i64,
}

impl RusageSnapshot {
    /// Current combined usage of terminated children.
    pub fn now() -> Self {
        // SAFETY: getrusage only writes into the zeroed struct we hand it.
        let usage = unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage);
            usage
        };
        Self {
            utime: timeval_seconds(usage.ru_utime),
            stime: timeval_seconds(usage.ru_stime),
            maxrss: usage.ru_maxrss,
            ixrss: usage.ru_ixrss,
            idrss: usage.ru_idrss,
            isrss: usage.ru_isrss,
            minflt: usage.ru_minflt,
            majflt: usage.ru_majflt,
            nswap: usage.ru_nswap,
            inblock: usage.ru_inblock,
            oublock: usage.ru_oublock,
            msgsnd: usage.ru_msgsnd,
            msgrcv: usage.ru_msgrcv,
            nsignals: usage.ru_nsignals,
            nvcsw: usage.ru_nvcsw,
            nivcsw: usage.ru_nivcsw,
        }
    }

    /// Componentwise difference against an earlier snapshot. Always a fresh
    /// value; the baseline is never mutated.
    pub fn delta(&self, earlier: &Self) -> RusageDelta {
        RusageDelta {
            ru_utime: round2(self.utime - earlier.utime),
            ru_stime: round2(self.stime - earlier.stime),
            ru_maxrss: self.maxrss - earlier.maxrss,
            ru_ixrss: self.ixrss - earlier.ixrss,
            ru_idrss: self.idrss - earlier.idrss,
            ru_isrss: self.isrss - earlier.isrss,
            ru_minflt: self.minflt - earlier.minflt,
            ru_majflt: self.majflt - earlier.majflt,
            ru_nswap: self.nswap - earlier.nswap,
            ru_inblock: self.inblock - earlier.inblock,
            ru_oublock: self.oublock - earlier.oublock,
            ru_msgsnd: self.msgsnd - earlier.msgsnd,
            ru_msgrcv: self.msgrcv - earlier.msgrcv,
            ru_nsignals: self.nsignals - earlier.nsignals,
            ru_nvcsw: self.nvcsw - earlier.nvcsw,
            ru_nivcsw: self.nivcsw - earlier.nivcsw,
        }
    }
}

fn timeval_seconds(tv: libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 / 1e6
}

/// Seconds rounded to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-execution resource delta, serialized into the metrics document with
/// the POSIX counter names.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RusageDelta {
    pub ru_utime: f64,
    pub ru_stime: f64,
    pub ru_maxrss: i64,
    pub ru_ixrss: i64,
    pub ru_idrss: i64,
    pub ru_isrss: i64,
    pub ru_minflt: i64,
    pub ru_majflt: i64,
    pub ru_nswap: i64,
    pub ru_inblock: i64,
    pub ru_oublock: i64,
    pub ru_msgsnd: i64,
    pub ru_msgrcv: i64,
    pub ru_nsignals: i64,
    pub ru_nvcsw: i64,
    pub ru_nivcsw: i64,
}

#[derive(Debug, Serialize)]
struct MetricsBody<'a> {
    rusage: &'a RusageDelta,
    runtime_in_seconds: f64,
    disk_storage_in_bytes: u64,
    exit_code: i64,
}

#[derive(Debug, Serialize)]
struct MetricsDoc<'a> {
    metrics: MetricsBody<'a>,
}

/// Recursive byte total of the regular files under `dir`.
pub fn storage_bytes(dir: &Path) -> u64 {
    let mut total = 0;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.metadata() {
            Ok(meta) if meta.is_file() => total += meta.len(),
            Ok(meta) if meta.is_dir() => total += storage_bytes(&path),
            _ => {}
        }
    }
    total
}

/// Renders `<kind>-metrics.json` into the working directory so it is uploaded
/// together with the run outputs.
pub fn write_metrics(
    dir: &Path,
    kind: &str,
    rusage: &RusageDelta,
    runtime_in_seconds: f64,
    disk_storage_in_bytes: u64,
    exit_code: i64,
) -> std::io::Result<()> {
    let doc = MetricsDoc {
        metrics: MetricsBody {
            rusage,
            runtime_in_seconds,
            disk_storage_in_bytes,
            exit_code,
        },
    };
    let body = serde_json::to_string(&doc).map_err(std::io::Error::other)?;
    std::fs::write(dir.join(format!("{kind}-metrics.json")), body)
}
