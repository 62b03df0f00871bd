//! Cached `Date` header values.
//!
//! Formatting an HTTP date on every response is wasteful, so a single
//! background thread refreshes the formatted value a little more often than
//! once per second and responses clone the cached bytes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;
use tracing::warn;

const UPDATE_INTERVAL: Duration = Duration::from_millis(800);

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::new_with_update_interval(UPDATE_INTERVAL));

pub struct DateService {
    current: Arc<ArcSwap<Bytes>>,
}

impl DateService {
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    fn new_with_update_interval(update_interval: Duration) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(now()));
        let updated = Arc::downgrade(&current);

        let spawned = thread::Builder::new().name("hserver-date".into()).spawn(move || {
            while let Some(current) = updated.upgrade() {
                current.store(Arc::new(now()));
                drop(current);
                thread::sleep(update_interval);
            }
        });
        if let Err(e) = spawned {
            warn!(cause = %e, "can't start the date updater, Date headers will go stale");
        }

        DateService { current }
    }

    /// Calls `f` with the current date as a header value.
    pub(crate) fn with_http_date<F>(&self, f: F)
    where
        F: FnOnce(HeaderValue),
    {
        let date = Bytes::clone(&self.current.load());
        match HeaderValue::from_maybe_shared(date) {
            Ok(value) => f(value),
            Err(e) => warn!(cause = %e, "formatted date is not a valid header value"),
        }
    }
}

fn now() -> Bytes {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    Bytes::copy_from_slice(&buf[..])
}
