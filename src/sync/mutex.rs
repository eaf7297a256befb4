//! Mutex that turns lock contention into spans.
//!
//! Each acquisition emits one span that starts when the caller begins
//! waiting and ends the moment the lock is granted, so the span duration is
//! pure queueing time. Work done while holding the lock belongs to the
//! caller's own span.
//!
//! Exclusion comes from a FIFO `tokio::sync::Mutex`. The granted guard is
//! parked inside the lock state so that acquire and release can be separate
//! calls; [`TracedMutex::lock`] wraps both in an RAII guard. A release only
//! drops the grant it belongs to: manual releases must come from the holding
//! session and a guard only releases the acquisition that created it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opentelemetry::trace::{Span as _, SpanKind, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::LockError;
use crate::session::Session;

/// Name of the span covering the wait for the lock.
pub const WAIT_SPAN_NAME: &str = "lock wait";

/// Attribute keys written by the mutex.
pub mod attributes {
    pub const LOCK_NAME: &str = "lock.name";
    pub const WAITER: &str = "lock.waiter";
    pub const HOLDER: &str = "lock.holder";
    pub const WAITERS_AHEAD: &str = "lock.waiters_ahead";
    pub const WAITERS_BEHIND: &str = "lock.waiters_behind";
    pub const BLOCKERS: &str = "lock.blockers";
    /// Set on the caller's span so the session is visible next to its work.
    pub const SESSION: &str = "session";
}

/// A mutual-exclusion lock whose contention is visible in traces.
pub struct TracedMutex {
    name: String,
    tracer: Tracer,
    enabled: bool,
    connection: Arc<AsyncMutex<()>>,
    state: Mutex<LockState>,
}

#[derive(Debug, Default)]
struct LockState {
    grant: Option<Grant>,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

/// The current holder and the exclusion permit it was granted.
#[derive(Debug)]
struct Grant {
    ticket: u64,
    session: Session,
    _permit: OwnedMutexGuard<()>,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    session: Session,
}

impl TracedMutex {
    /// Create an enabled mutex that reports through `tracer`.
    pub fn new(name: impl Into<String>, tracer: Tracer) -> Self {
        Self {
            name: name.into(),
            tracer,
            enabled: true,
            connection: Arc::new(AsyncMutex::new(())),
            state: Mutex::new(LockState::default()),
        }
    }

    /// Enable or disable exclusion.
    ///
    /// A disabled mutex never blocks, records nothing and treats release as
    /// a no-op.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Session currently holding the lock.
    pub fn holder(&self) -> Option<Session> {
        self.state().grant.as_ref().map(|g| g.session.clone())
    }

    /// Number of callers waiting for the lock.
    pub fn waiting(&self) -> usize {
        self.state().waiters.len()
    }

    /// Block until the lock is free, then hold it on behalf of `session`.
    ///
    /// The wait span is a child of the span in `cx`. No timeout applies and
    /// the wait is not interrupted by anything but dropping the future.
    pub async fn acquire(&self, cx: &Context, session: &Session) {
        self.acquire_grant(cx, session).await;
    }

    /// Acquire and return the ticket of the resulting grant, if any.
    async fn acquire_grant(&self, cx: &Context, session: &Session) -> Option<u64> {
        if !self.enabled {
            return None;
        }

        cx.span()
            .set_attribute(KeyValue::new(attributes::SESSION, session.to_string()));

        let ticket = self.enqueue(session);
        let blockers = ticket.blockers.join(",");
        tracing::info!(
            lock = %self.name,
            session = %session,
            waiting = ticket.blockers.len(),
            blockers = %blockers,
            "waiting for lock"
        );

        let mut span = self
            .tracer
            .span_builder(WAIT_SPAN_NAME)
            .with_kind(SpanKind::Internal)
            .with_attributes([
                KeyValue::new(attributes::LOCK_NAME, self.name.clone()),
                KeyValue::new(attributes::WAITER, session.to_string()),
                KeyValue::new(attributes::WAITERS_AHEAD, ticket.blockers.len() as i64),
            ])
            .start_with_context(&self.tracer, cx);
        if !ticket.blockers.is_empty() {
            span.add_event(
                "waiting for lock",
                vec![KeyValue::new(attributes::BLOCKERS, blockers)],
            );
        }

        let permit = Arc::clone(&self.connection).lock_owned().await;

        let behind: Vec<String> = {
            let mut state = self.state();
            debug_assert!(state.grant.is_none(), "traced mutex granted twice");
            state.grant = Some(Grant {
                ticket: ticket.ticket,
                session: session.clone(),
                _permit: permit,
            });
            state.waiters.retain(|w| w.ticket != ticket.ticket);
            state.waiters.iter().map(|w| w.session.to_string()).collect()
        };
        let granted = ticket.ticket;
        drop(ticket);

        span.set_attribute(KeyValue::new(attributes::HOLDER, session.to_string()));
        span.set_attribute(KeyValue::new(attributes::WAITERS_BEHIND, behind.len() as i64));
        span.add_event(
            "acquired lock",
            vec![KeyValue::new(attributes::WAITERS_BEHIND, behind.len() as i64)],
        );
        span.end();

        tracing::info!(
            lock = %self.name,
            session = %session,
            waiting_behind = behind.len(),
            waiters = %behind.join(","),
            "acquired lock"
        );
        Some(granted)
    }

    /// Release the lock held by `session`.
    ///
    /// Fails with [`LockError::NotHeld`] when nobody holds the lock and with
    /// [`LockError::NotHolder`] when another session does; in both cases the
    /// lock state is left untouched.
    pub fn try_release(&self, session: &Session) -> Result<(), LockError> {
        if !self.enabled {
            return Ok(());
        }
        self.release_where(|grant| {
            if grant.session == *session {
                Ok(())
            } else {
                Err(LockError::NotHolder {
                    lock: self.name.clone(),
                    holder: grant.session.to_string(),
                    caller: session.to_string(),
                })
            }
        })
    }

    /// Release the lock held by `session`.
    ///
    /// # Panics
    ///
    /// Panics if `session` does not hold the lock; that is a broken caller
    /// contract.
    pub fn release(&self, session: &Session) {
        if let Err(err) = self.try_release(session) {
            panic!("{err}");
        }
    }

    /// Acquire the lock and release it when the returned guard drops.
    pub async fn lock(&self, cx: &Context, session: &Session) -> TracedMutexGuard<'_> {
        let ticket = self.acquire_grant(cx, session).await;
        TracedMutexGuard {
            mutex: self,
            ticket,
        }
    }

    fn release_ticket(&self, ticket: u64) -> Result<(), LockError> {
        self.release_where(|grant| {
            if grant.ticket == ticket {
                Ok(())
            } else {
                Err(LockError::NotHolder {
                    lock: self.name.clone(),
                    holder: grant.session.to_string(),
                    caller: format!("guard #{ticket}"),
                })
            }
        })
    }

    /// Drop the current grant if `check` accepts it.
    fn release_where<F>(&self, check: F) -> Result<(), LockError>
    where
        F: FnOnce(&Grant) -> Result<(), LockError>,
    {
        let grant = {
            let mut state = self.state();
            let Some(grant) = state.grant.as_ref() else {
                return Err(LockError::NotHeld {
                    lock: self.name.clone(),
                });
            };
            check(grant)?;
            state.grant.take()
        };
        // the permit is returned to the queue outside the state lock
        if let Some(grant) = grant {
            tracing::debug!(lock = %self.name, session = %grant.session, "released lock");
        }
        Ok(())
    }

    fn enqueue(&self, session: &Session) -> WaiterTicket<'_> {
        let mut state = self.state();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let mut blockers: Vec<String> = state
            .grant
            .iter()
            .map(|g| g.session.to_string())
            .collect();
        blockers.extend(state.waiters.iter().map(|w| w.session.to_string()));

        state.waiters.push_back(Waiter {
            ticket,
            session: session.clone(),
        });
        WaiterTicket {
            mutex: self,
            ticket,
            blockers,
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TracedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("TracedMutex")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("holder", &state.grant.as_ref().map(|g| &g.session))
            .field("waiting", &state.waiters.len())
            .finish_non_exhaustive()
    }
}

/// Place in the wait queue; leaves the queue when dropped.
struct WaiterTicket<'a> {
    mutex: &'a TracedMutex,
    ticket: u64,
    /// Holder and waiters that were ahead at enqueue time.
    blockers: Vec<String>,
}

impl Drop for WaiterTicket<'_> {
    fn drop(&mut self) {
        // no-op after a successful acquire; removes abandoned waiters
        self.mutex
            .state()
            .waiters
            .retain(|w| w.ticket != self.ticket);
    }
}

/// Holds a [`TracedMutex`] until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct TracedMutexGuard<'a> {
    mutex: &'a TracedMutex,
    /// `None` when the mutex is disabled.
    ticket: Option<u64>,
}

impl Drop for TracedMutexGuard<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket else {
            return;
        };
        if let Err(err) = self.mutex.release_ticket(ticket) {
            tracing::error!(error = %err, "traced mutex released outside its guard");
        }
    }
}
