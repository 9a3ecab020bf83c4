use anyhow::{anyhow, Context as _, Result};
use dwq_util::config::BrokerAddr;
use redis::{Connection, ConnectionLike as _};
use slog::{debug, o, Logger};
use std::sync::Mutex;
use std::time::Duration;

use crate::qstat::QueueStats;

/// A job as returned by `GETJOB`, before we've tried to deserialize its body
/// into a [`dwq_base::JobSpec`].
#[derive(Clone, Debug)]
pub struct RawJob {
    pub queue_name: String,
    pub job_id: String,
    pub body: Vec<u8>,
    pub nacks: u32,
    pub additional_deliveries: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GetJobOpts {
    /// How long a single `GETJOB` call may block for, `None` meaning block
    /// until the broker's own default takes over. Workers pass a short
    /// timeout and loop, so that the connection mutex doesn't starve
    /// sibling slots indefinitely (see DESIGN.md).
    pub timeout: Option<Duration>,
    pub count: Option<usize>,
    pub nohang: bool,
}

/// One process's connection to a broker cluster. There is exactly one
/// physical connection, guarded by a mutex: concurrent callers (e.g. several
/// worker slots) serialize through it, matching the "module-level broker
/// handle" architecture the original system has (spec §9) rather than
/// pretending the broker adapter is free to fan out connections it was never
/// designed to manage.
pub struct BrokerContext {
    conn: Mutex<Option<Connection>>,
    addrs: Vec<BrokerAddr>,
    log: Logger,
}

impl BrokerContext {
    /// Dial the first reachable node in `addrs`.
    pub fn connect(addrs: &[BrokerAddr], log: &Logger) -> Result<Self> {
        let log = log.new(o!("component" => "broker"));
        let mut last_err = None;
        for addr in addrs {
            match Self::dial(addr) {
                Ok(conn) => {
                    debug!(log, "connected to broker"; "addr" => %addr);
                    return Ok(Self {
                        conn: Mutex::new(Some(conn)),
                        addrs: addrs.to_vec(),
                        log,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("no broker addresses given")))
    }

    fn dial(addr: &BrokerAddr) -> Result<Connection> {
        let url = format!("redis://{addr}");
        let client = redis::Client::open(url.as_str())
            .with_context(|| format!("building broker client for {addr}"))?;
        client
            .get_connection()
            .with_context(|| format!("connecting to broker at {addr}"))
    }

    /// Try to reconnect using the same address list this context was
    /// constructed with. Used by the worker and client top-level loops on
    /// the 1s reconnect backoff from spec §5.
    pub fn reconnect(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        for addr in &self.addrs {
            if let Ok(conn) = Self::dial(addr) {
                *guard = Some(conn);
                debug!(self.log, "reconnected to broker"; "addr" => %addr);
                return Ok(());
            }
        }
        *guard = None;
        Err(anyhow!("no broker node reachable"))
    }

    /// True only when bound to a connection that answers `PING`.
    pub fn connected(&self) -> bool {
        let mut guard = self.conn.lock().unwrap();
        let Some(conn) = guard.as_mut() else {
            return false;
        };
        redis::cmd("PING").query::<String>(conn).is_ok()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().unwrap();
        let conn = guard.as_mut().ok_or_else(|| anyhow!("broker not connected"))?;
        f(conn)
    }

    pub fn add_job(
        &self,
        queue: &str,
        body: &[u8],
        timeout_ms: u64,
        max_retries: Option<u32>,
    ) -> Result<String> {
        self.with_conn(|conn| {
            let mut cmd = redis::cmd("ADDJOB");
            cmd.arg(queue).arg(body).arg(timeout_ms);
            if let Some(retries) = max_retries {
                cmd.arg("RETRY").arg(retries);
            }
            let id: String = cmd.query(conn).context("ADDJOB")?;
            Ok(id)
        })
    }

    pub fn get_job(&self, queues: &[String], opts: GetJobOpts) -> Result<Vec<RawJob>> {
        self.with_conn(|conn| {
            let mut cmd = redis::cmd("GETJOB");
            if opts.nohang {
                cmd.arg("NOHANG");
            }
            if let Some(timeout) = opts.timeout {
                cmd.arg("TIMEOUT").arg(timeout.as_millis() as u64);
            }
            if let Some(count) = opts.count {
                cmd.arg("COUNT").arg(count);
            }
            cmd.arg("WITHCOUNTERS").arg("FROM");
            for queue in queues {
                cmd.arg(queue);
            }
            let raw: Option<Vec<(String, String, Vec<u8>, u32, u32)>> =
                cmd.query(conn).context("GETJOB")?;
            Ok(raw
                .unwrap_or_default()
                .into_iter()
                .map(
                    |(queue_name, job_id, body, nacks, additional_deliveries)| RawJob {
                        queue_name,
                        job_id,
                        body,
                        nacks,
                        additional_deliveries,
                    },
                )
                .collect())
        })
    }

    pub fn ack(&self, job_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            redis::cmd("ACKJOB").arg(job_id).query::<()>(conn).context("ACKJOB")
        })
    }

    pub fn fast_ack(&self, job_ids: &[String]) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let mut cmd = redis::cmd("FASTACK");
            for id in job_ids {
                cmd.arg(id);
            }
            cmd.query::<()>(conn).context("FASTACK")
        })
    }

    pub fn nack(&self, job_id: &str) -> Result<()> {
        self.with_conn(|conn| redis::cmd("NACK").arg(job_id).query::<()>(conn).context("NACK"))
    }

    pub fn nack_many(&self, job_ids: &[String]) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let mut cmd = redis::cmd("NACK");
            for id in job_ids {
                cmd.arg(id);
            }
            cmd.query::<()>(conn).context("NACK")
        })
    }

    pub fn del(&self, job_ids: &[String]) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let mut cmd = redis::cmd("DELJOB");
            for id in job_ids {
                cmd.arg(id);
            }
            cmd.query::<()>(conn).context("DELJOB")
        })
    }

    pub fn working(&self, job_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            redis::cmd("WORKING")
                .arg(job_id)
                .query::<()>(conn)
                .context("WORKING")
        })
    }

    pub fn qstat(&self, queue: &str) -> Result<QueueStats> {
        self.with_conn(|conn| {
            let fields: Vec<redis::Value> =
                redis::cmd("QSTAT").arg(queue).query(conn).context("QSTAT")?;
            QueueStats::from_resp_fields(&fields)
        })
    }

    /// `qstat` over every name in `queues`, each queue's own error kept
    /// alongside it rather than aborting the whole batch on the first
    /// invalid name. Used by `dwqm queue --show` to report per-queue.
    pub fn qstat_all(&self, queues: &[String]) -> Vec<(String, Result<QueueStats>)> {
        queues.iter().map(|q| (q.clone(), self.qstat(q))).collect()
    }

    /// Enumerate every queue the broker currently knows about, via `QSCAN`
    /// (Disque's cursor-based queue-name scan, the same shape as Redis
    /// `SCAN`). Used by `dwqm queue --show` when no names are given.
    pub fn scan_queues(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut cursor: i64 = 0;
            let mut names = Vec::new();
            loop {
                let (next, batch): (i64, Vec<String>) = redis::cmd("QSCAN")
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(1000)
                    .query(conn)
                    .context("QSCAN")?;
                names.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok(names)
        })
    }
}
