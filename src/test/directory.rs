use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use rayon::prelude::*;

use crate::{Directory, EventQueue, EventThread, PushError, Worker, WorkerId};

#[derive(Clone)]
enum PeerEvent {
    Ping,
    Pong,
}

/// Counts what it receives and answers every ping routed through the directory.
struct Peer {
    directory: Directory<PeerEvent>,
    answer_to: Option<WorkerId>,
    pings: Arc<AtomicUsize>,
    pongs: Arc<AtomicUsize>,
}

impl Worker for Peer {
    type Event = PeerEvent;

    fn process_event(&mut self, event: PeerEvent, _queue: &EventQueue<PeerEvent>) {
        match event {
            PeerEvent::Ping => {
                self.pings.fetch_add(1, Ordering::SeqCst);
                if let Some(peer) = self.answer_to {
                    let _ = self.directory.send(peer, PeerEvent::Pong);
                }
            }
            PeerEvent::Pong => {
                self.pongs.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

type Counter = Arc<AtomicUsize>;

fn peer(
    directory: &Directory<PeerEvent>,
    answer_to: Option<WorkerId>,
) -> (EventThread<Peer>, Counter, Counter) {
    let pings = Arc::new(AtomicUsize::new(0));
    let pongs = Arc::new(AtomicUsize::new(0));
    let worker = EventThread::new(Peer {
        directory: directory.clone(),
        answer_to,
        pings: pings.clone(),
        pongs: pongs.clone(),
    });
    (worker, pings, pongs)
}

#[test]
fn register_lookup_and_unregister() {
    let directory = Directory::new();
    let queue = EventQueue::new(8);
    let id = directory.register(queue.mailbox());
    assert_eq!(directory.len(), 1);
    assert!(directory.get(id).unwrap().same_queue(&queue.mailbox()));

    directory.send(id, PeerEvent::Ping).unwrap();
    assert_eq!(queue.len(), 1);

    assert!(directory.unregister(id));
    assert!(!directory.unregister(id));
    assert!(directory.is_empty());
    assert!(matches!(
        directory.send(id, PeerEvent::Ping),
        Err(PushError::Disconnected(PeerEvent::Ping))
    ));
}

#[test]
fn broadcast_reaches_every_worker() {
    let directory = Directory::new();
    let queues: Vec<EventQueue<PeerEvent>> = (0..3).map(|_| EventQueue::new(4)).collect();
    for queue in &queues {
        directory.register(queue.mailbox());
    }
    assert_eq!(directory.broadcast(PeerEvent::Pong), 3);
    assert!(queues.iter().all(|queue| queue.len() == 1));
    assert_eq!(directory.ids().len(), 3);
}

#[test]
fn workers_talk_through_the_directory() {
    const WORKERS: usize = 8;
    const PINGS_PER_SENDER: usize = 1000;

    let directory = Directory::new();
    let (collector, _, pongs) = peer(&directory, None);
    let collector_id = directory.register(collector.mailbox());
    collector.start().unwrap();

    let peers: Vec<_> = (0..WORKERS)
        .map(|_| peer(&directory, Some(collector_id)))
        .collect();
    let ids: Vec<WorkerId> = peers
        .iter()
        .map(|(worker, _, _)| directory.register(worker.mailbox()))
        .collect();
    for (worker, _, _) in &peers {
        worker.start().unwrap();
    }

    (0..WORKERS).into_par_iter().for_each(|sender| {
        for i in 0..PINGS_PER_SENDER {
            let target = ids[(sender + i) % WORKERS];
            directory.send(target, PeerEvent::Ping).unwrap();
        }
    });

    // peers first, so every pong is queued before the collector's stop marker
    for (worker, _, _) in &peers {
        worker.stop_when_drained();
        worker.join().unwrap();
    }
    collector.stop_when_drained();
    collector.join().unwrap();

    let pings: usize = peers
        .iter()
        .map(|(_, pings, _)| pings.load(Ordering::SeqCst))
        .sum();
    assert_eq!(pings, WORKERS * PINGS_PER_SENDER);
    assert_eq!(pongs.load(Ordering::SeqCst), WORKERS * PINGS_PER_SENDER);
}
