use std::{sync::Arc, time::Duration};

use crate::{
    EventQueue, EventThread, MailboxReceiver, TimerConfig, TimerHandle, TimerId, TimerService,
    Worker,
};

fn service() -> TimerService {
    TimerService::spawn(TimerConfig::new().name("test-timer")).unwrap()
}

/// A receiver forwarding fired ids into a channel.
fn forwarding() -> (
    Arc<impl Fn(TimerId) + Send + Sync + 'static>,
    crossbeam_channel::Receiver<TimerId>,
) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let forward = move |id: TimerId| {
        let _ = sender.send(id);
    };
    (Arc::new(forward), receiver)
}

#[test]
fn timers_fire_in_expiry_order() {
    let timer = service();
    let (receiver, fired) = forwarding();

    let late = timer.order(&receiver, Duration::from_millis(80));
    let early = timer.order(&receiver, Duration::from_millis(20));

    assert_eq!(fired.recv_timeout(Duration::from_secs(2)).unwrap(), early);
    assert_eq!(fired.recv_timeout(Duration::from_secs(2)).unwrap(), late);
}

#[test]
fn cancel_before_expiry_suppresses_callback() {
    let timer = service();
    let (receiver, fired) = forwarding();

    let id = timer.order(&receiver, Duration::from_millis(150));
    assert_eq!(timer.pending(), 1);
    assert!(timer.cancel(id));
    assert!(!timer.cancel(id));
    assert_eq!(timer.pending(), 0);

    let kept = timer.order(&receiver, Duration::from_millis(200));
    assert_eq!(fired.recv_timeout(Duration::from_secs(2)).unwrap(), kept);
    assert!(fired.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn cancel_after_fire_returns_false() {
    let timer = service();
    let (receiver, fired) = forwarding();

    let id = timer.order(&receiver, Duration::from_millis(5));
    assert_eq!(fired.recv_timeout(Duration::from_secs(2)).unwrap(), id);
    assert!(!timer.cancel(id));
    assert!(!timer.cancel(TimerId::MAX));
}

#[test]
fn dropped_receiver_is_skipped() {
    let timer = service();
    let (gone, gone_fired) = forwarding();
    let (alive, alive_fired) = forwarding();

    timer.order(&gone, Duration::from_millis(10));
    drop(gone);
    let id = timer.order(&alive, Duration::from_millis(30));

    assert_eq!(alive_fired.recv_timeout(Duration::from_secs(2)).unwrap(), id);
    assert!(gone_fired.try_recv().is_err());
}

#[test]
fn orders_placed_before_start_fire_after_start() {
    let timer = TimerService::new(TimerConfig::default());
    let (receiver, fired) = forwarding();
    let id = timer.handle().order(&receiver, Duration::from_millis(1));
    std::thread::sleep(Duration::from_millis(20));
    assert!(fired.try_recv().is_err());

    timer.start().unwrap();
    assert_eq!(fired.recv_timeout(Duration::from_secs(2)).unwrap(), id);
    timer.exit();
    timer.join().unwrap();
}

#[test]
fn sooner_order_wakes_sleeping_service() {
    let timer = service();
    let (receiver, fired) = forwarding();

    timer.order(&receiver, Duration::from_secs(30));
    // let the service go to sleep on the 30s order
    std::thread::sleep(Duration::from_millis(20));
    let soon = timer.order(&receiver, Duration::from_millis(10));
    assert_eq!(fired.recv_timeout(Duration::from_secs(2)).unwrap(), soon);
    assert_eq!(timer.pending(), 1);
}

enum TickEvent {
    Tick(TimerId),
}

/// Re-orders a timer from every tick until `remaining` reaches zero.
struct Ticker {
    timer: TimerHandle,
    receiver: Option<Arc<MailboxReceiver<TickEvent>>>,
    interval: Duration,
    remaining: usize,
    total: usize,
}

impl Ticker {
    fn new(timer: TimerHandle, interval_ms: u64, count: usize) -> Self {
        Self {
            timer,
            receiver: None,
            interval: Duration::from_millis(interval_ms),
            remaining: count,
            total: 0,
        }
    }
    fn order_timer(&self) {
        if let Some(receiver) = &self.receiver {
            self.timer.order(receiver, self.interval);
        }
    }
}

impl Worker for Ticker {
    type Event = TickEvent;

    fn on_start(&mut self, queue: &EventQueue<TickEvent>) {
        self.receiver = Some(Arc::new(MailboxReceiver::new(
            queue.mailbox(),
            TickEvent::Tick,
        )));
        self.order_timer();
    }

    fn process_event(&mut self, event: TickEvent, queue: &EventQueue<TickEvent>) {
        let TickEvent::Tick(id) = event;
        self.remaining -= 1;
        self.total += 1;
        log::trace!("tick [{id}] total [{}]", self.total);
        if self.remaining > 0 {
            self.order_timer();
        } else {
            queue.break_event_loop();
        }
    }
}

#[test]
fn rescheduling_timer_fires_exact_count() {
    let timer = service();
    let ticker = EventThread::new(Ticker::new(timer.handle(), 1, 1000));
    ticker.start().unwrap();
    ticker.join().unwrap();

    ticker.with_worker(|ticker| {
        assert_eq!(ticker.total, 1000);
        assert_eq!(ticker.remaining, 0);
    });
    assert_eq!(timer.pending(), 0);
}

#[test]
fn several_tickers_share_one_service() {
    let timer = service();
    let plans = [(1, 200), (5, 40), (10, 10), (30, 5), (50, 4)];
    let tickers: Vec<_> = plans
        .iter()
        .map(|&(interval, count)| EventThread::new(Ticker::new(timer.handle(), interval, count)))
        .collect();
    for ticker in &tickers {
        ticker.start().unwrap();
    }
    for (ticker, &(_, count)) in tickers.iter().zip(plans.iter()) {
        ticker.join().unwrap();
        ticker.with_worker(|ticker| assert_eq!(ticker.total, count));
    }
}

fn failing(_: TimerId) {
    panic!("receiver failure");
}

#[test]
fn panicking_receiver_does_not_stop_the_service() {
    let timer = service();
    let faulty = Arc::new(failing);
    let (receiver, fired) = forwarding();

    timer.order(&faulty, Duration::from_millis(5));
    let id = timer.order(&receiver, Duration::from_millis(40));

    assert_eq!(fired.recv_timeout(Duration::from_secs(2)).unwrap(), id);
    let again = timer.order(&receiver, Duration::from_millis(1));
    assert_eq!(fired.recv_timeout(Duration::from_secs(2)).unwrap(), again);
    assert_eq!(timer.pending(), 0);
}
