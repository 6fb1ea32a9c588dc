use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    clock::Clock,
    config::Settings,
    display::{CodeSurface, DisplayEntry},
    totp::{countdown, Totp},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Active,
    /// Terminal, the entry is never written to again
    Cancelled,
}

/// Returned by [`RefreshScheduler::register`], needed to cancel the entry.
#[derive(Debug, Clone)]
pub struct EntryHandle {
    id: EntryId,
    active: Arc<AtomicBool>,
}

impl EntryHandle {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn state(&self) -> EntryState {
        if self.active.load(Ordering::SeqCst) {
            EntryState::Active
        } else {
            EntryState::Cancelled
        }
    }
}

struct EntryTask {
    // Checked right before every write to the surface
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl EntryTask {
    fn stop(self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

/// One entry's recomputation, run on every tick.
struct Refresh {
    clock: Arc<dyn Clock>,
    totp: Totp,
    delta_steps: i64,
    surface: Arc<dyn CodeSurface>,
    active: Arc<AtomicBool>,
    last_seen: Option<Duration>,
}

impl Refresh {
    fn run(&mut self) {
        let now = self.clock.now();

        if let (Ok(now), Some(last_seen)) = (&now, self.last_seen) {
            if *now < last_seen {
                log::warn!(
                    "Clock moved backwards by {:?} between two refreshes",
                    last_seen - *now
                );
            }
        }

        let result = now.and_then(|now| {
            self.last_seen = Some(now);
            self.totp
                .generate_at_offset(now.as_secs(), self.delta_steps)
                .map(|code| (code, countdown(now, self.totp.parameters().period)))
        });

        // No lock is held across the writes: a surface may cancel its own
        // entry from inside one of them.
        if !self.is_active() {
            return;
        }

        match result {
            Ok((code, remaining)) => {
                log::trace!("Refreshed code, {remaining}s remaining");
                self.surface.show_code(&code);

                if self.is_active() {
                    self.surface.show_countdown(remaining);
                }
            }
            Err(e) => {
                log::warn!("Could not compute the code: {e}");
                self.surface.show_failure(&e);
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Runs `f` right away, then once per elapsed `tick`.
///
/// Ticks missed while the runtime was busy are skipped, not replayed.
fn spawn_every_tick<F>(tick: Duration, mut f: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    f();

    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            f();
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RefreshScheduler {
    clock: Arc<dyn Clock>,
    tick: Duration,
    countdown_period: u64,
    next_id: AtomicU64,
    entries: Mutex<HashMap<EntryId, EntryTask>>,
    countdown: Arc<watch::Sender<u64>>,
    countdown_task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(clock: Arc<dyn Clock>, settings: &Settings) -> Self {
        let countdown_period = settings.default_period;
        let initial = clock
            .now()
            .map(|now| countdown(now, countdown_period))
            .unwrap_or(countdown_period);
        let (countdown, _) = watch::channel(initial);

        Self {
            clock,
            tick: settings.tick_interval(),
            countdown_period,
            next_id: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
            countdown: Arc::new(countdown),
            countdown_task: Mutex::new(None),
        }
    }

    /// Starts refreshing `surface` with the code `delta_steps` periods away
    /// from the current one.
    ///
    /// The first code is written before this returns, the following ones on
    /// every tick until the entry is cancelled. A failed computation is
    /// written as a failure and retried on the next tick.
    ///
    /// # Panics
    /// When called outside of a tokio runtime
    pub fn register(
        &self,
        totp: Totp,
        delta_steps: i64,
        surface: Arc<dyn CodeSurface>,
    ) -> EntryHandle {
        let id = EntryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let active = Arc::new(AtomicBool::new(true));

        let mut refresh = Refresh {
            clock: self.clock.clone(),
            totp,
            delta_steps,
            surface,
            active: active.clone(),
            last_seen: None,
        };
        let task = spawn_every_tick(self.tick, move || refresh.run());

        lock(&self.entries).insert(
            id,
            EntryTask {
                active: active.clone(),
                task,
            },
        );
        log::info!("Registered entry {id:?}");

        EntryHandle { id, active }
    }

    /// Registers a display entry, using the offset it was built with.
    pub fn register_entry(&self, entry: Arc<DisplayEntry>, totp: Totp) -> EntryHandle {
        let delta_steps = entry.delta_steps();
        log::debug!("Registering {} ({delta_steps:+} steps)", entry.service());

        self.register(totp, delta_steps, entry)
    }

    /// Stops refreshing the entry. Once this returns, nothing is written to
    /// its surface anymore, including when called from within one of the
    /// surface's own callbacks. A write already running on another worker
    /// thread may still finish. Returns false if it was already cancelled.
    pub fn cancel(&self, handle: &EntryHandle) -> bool {
        let removed = lock(&self.entries).remove(&handle.id);

        match removed {
            Some(entry) => {
                entry.stop();
                log::info!("Cancelled entry {:?}", handle.id);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, handle: &EntryHandle) -> bool {
        lock(&self.entries).contains_key(&handle.id)
    }

    pub fn active_entries(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Seconds left in the current period, updated once per tick and shared
    /// by every countdown indicator.
    ///
    /// # Panics
    /// When first called outside of a tokio runtime
    pub fn subscribe_countdown(&self) -> watch::Receiver<u64> {
        let mut task = lock(&self.countdown_task);

        if task.is_none() {
            let clock = self.clock.clone();
            let sender = self.countdown.clone();
            let period = self.countdown_period;

            *task = Some(spawn_every_tick(self.tick, move || match clock.now() {
                Ok(now) => {
                    sender.send_replace(countdown(now, period));
                }
                Err(e) => log::warn!("Could not read the clock for the countdown: {e}"),
            }));
        }

        self.countdown.subscribe()
    }

    /// Cancels every entry and the countdown.
    pub fn shutdown(&self) {
        let entries: Vec<_> = lock(&self.entries).drain().collect();
        let count = entries.len();

        for (_, entry) in entries {
            entry.stop();
        }

        if let Some(task) = lock(&self.countdown_task).take() {
            task.abort();
        }

        if count > 0 {
            log::info!("Cancelled {count} entries");
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("tick", &self.tick)
            .field("countdown_period", &self.countdown_period)
            .field("entries", &self.active_entries())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

    use super::{EntryHandle, EntryState, RefreshScheduler};
    use crate::{
        clock::{ManualClock, TokioClock},
        config::Settings,
        display::{CodeState, CodeSurface, DisplayEntry},
        totp::Totp,
        OtpCode, OtpError,
    };

    #[derive(Debug, PartialEq)]
    enum Write {
        Code(String),
        Failure,
    }

    struct RecordingSurface {
        tx: UnboundedSender<Write>,
    }

    impl CodeSurface for RecordingSurface {
        fn show_code(&self, code: &OtpCode) {
            let _ = self.tx.send(Write::Code(code.to_string()));
        }

        fn show_failure(&self, _error: &OtpError) {
            let _ = self.tx.send(Write::Failure);
        }
    }

    /// Detaches itself on its second write, like an entry removed from the page.
    struct SelfCancelling {
        scheduler: Arc<RefreshScheduler>,
        handle: Mutex<Option<EntryHandle>>,
        writes: AtomicUsize,
    }

    impl CodeSurface for SelfCancelling {
        fn show_code(&self, _code: &OtpCode) {
            self.writes.fetch_add(1, Ordering::SeqCst);

            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                self.scheduler.cancel(handle);
            }
        }

        fn show_failure(&self, _error: &OtpError) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }

        fn show_countdown(&self, _seconds: u64) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recording() -> (Arc<RecordingSurface>, UnboundedReceiver<Write>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingSurface { tx }), rx)
    }

    fn totp() -> Totp {
        Totp::new("12345678901234567890".to_string())
    }

    fn scheduler_at(seconds: u64) -> RefreshScheduler {
        let clock = TokioClock::anchored_at(Duration::from_secs(seconds));
        RefreshScheduler::new(Arc::new(clock), &Settings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn first_code_is_written_on_register() {
        let scheduler = scheduler_at(0);
        let (surface, mut rx) = recording();

        scheduler.register(totp(), 0, surface);

        assert_eq!(Ok(Write::Code("240304".into())), rx.try_recv());
    }

    #[tokio::test(start_paused = true)]
    async fn code_changes_on_period_boundary() {
        let scheduler = scheduler_at(28);
        let (surface, mut rx) = recording();
        let started = tokio::time::Instant::now();

        scheduler.register(totp(), 0, surface);

        assert_eq!(Some(Write::Code("240304".into())), rx.recv().await);
        assert_eq!(Some(Write::Code("240304".into())), rx.recv().await);
        assert_eq!(Some(Write::Code("782699".into())), rx.recv().await);
        assert_eq!(Duration::from_secs(2), started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_entry_is_never_written_again() {
        let scheduler = scheduler_at(0);
        let (surface, mut rx) = recording();

        let handle = scheduler.register(totp(), 0, surface);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());

        assert!(scheduler.cancel(&handle));
        assert_eq!(EntryState::Cancelled, handle.state());
        assert!(!scheduler.is_active(&handle));

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty | TryRecvError::Disconnected)));
        assert!(!scheduler.cancel(&handle));
    }

    #[tokio::test(start_paused = true)]
    async fn surface_can_cancel_its_own_entry() {
        let scheduler = Arc::new(scheduler_at(0));
        let surface = Arc::new(SelfCancelling {
            scheduler: scheduler.clone(),
            handle: Mutex::new(None),
            writes: AtomicUsize::new(0),
        });

        let handle = scheduler.register(totp(), 0, surface.clone());
        *surface.handle.lock().unwrap() = Some(handle.clone());
        // code and countdown of the immediate refresh
        assert_eq!(2, surface.writes.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(3)).await;

        // only the code of the first tick, the countdown after it is skipped
        assert_eq!(3, surface.writes.load(Ordering::SeqCst));
        assert_eq!(EntryState::Cancelled, handle.state());
        assert_eq!(0, scheduler.active_entries());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_ticks() {
        let scheduler = scheduler_at(0);
        let (surface, mut rx) = recording();
        let mut broken = totp();
        broken.with_period(0);

        scheduler.register(broken, 0, surface);

        assert_eq!(Some(Write::Failure), rx.recv().await);
        assert_eq!(Some(Write::Failure), rx.recv().await);
        assert_eq!(Some(Write::Failure), rx.recv().await);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_are_refreshed_independently() {
        let scheduler = scheduler_at(45);
        let previous = Arc::new(DisplayEntry::new("GitHub").with_delta(-1));
        let current = Arc::new(DisplayEntry::new("GitHub"));
        let next = Arc::new(DisplayEntry::new("GitHub").with_delta(1));

        for entry in [&previous, &current, &next] {
            scheduler.register_entry(entry.clone(), totp());
        }

        assert_eq!(3, scheduler.active_entries());
        assert_eq!(CodeState::Ready(OtpCode::new(240304, 6)), previous.state());
        assert_eq!(CodeState::Ready(OtpCode::new(782699, 6)), current.state());
        assert_eq!(CodeState::Ready(OtpCode::new(616004, 6)), next.state());
        assert_eq!(15, current.countdown());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_is_broadcast_every_tick() {
        let scheduler = scheduler_at(25);

        let mut rx = scheduler.subscribe_countdown();
        assert_eq!(5, *rx.borrow_and_update());

        let mut seen = Vec::new();
        for _ in 0..6 {
            rx.changed().await.unwrap();
            seen.push(*rx.borrow_and_update());
        }

        assert_eq!(vec![4, 3, 2, 1, 30, 29], seen);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let scheduler = scheduler_at(0);
        let (surface, mut rx) = recording();

        let handles: Vec<_> = (0..3)
            .map(|_| scheduler.register(totp(), 0, surface.clone()))
            .collect();
        while rx.try_recv().is_ok() {}

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(0, scheduler.active_entries());
        assert!(handles
            .iter()
            .all(|handle| handle.state() == EntryState::Cancelled));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_going_backwards_still_refreshes() {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(100)));
        let scheduler = RefreshScheduler::new(clock.clone(), &Settings::default());
        let (surface, mut rx) = recording();

        scheduler.register(totp(), 0, surface);
        assert!(rx.recv().await.is_some());

        clock.set(Duration::from_secs(5));

        assert_eq!(Some(Write::Code("240304".into())), rx.recv().await);
    }
}
