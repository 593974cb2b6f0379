use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use termbench_model::{ScreenId, UpdatePacket};
use tokio::sync::broadcast;

pub const DEFAULT_SCREEN_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_GLOBAL_BUFFER_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateBusConfig {
    pub screen_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

impl Default for UpdateBusConfig {
    fn default() -> Self {
        Self {
            screen_buffer_capacity: DEFAULT_SCREEN_BUFFER_CAPACITY,
            global_buffer_capacity: DEFAULT_GLOBAL_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub struct UpdateBus {
    next_sequence: AtomicU64,
    config: UpdateBusConfig,
    screen_senders: RwLock<HashMap<ScreenId, broadcast::Sender<UpdatePacket>>>,
    global_sender: broadcast::Sender<UpdatePacket>,
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new(UpdateBusConfig::default())
    }
}

impl UpdateBus {
    pub fn new(config: UpdateBusConfig) -> Self {
        assert!(
            config.screen_buffer_capacity > 0,
            "screen_buffer_capacity must be greater than 0"
        );
        assert!(
            config.global_buffer_capacity > 0,
            "global_buffer_capacity must be greater than 0"
        );

        let (global_sender, _global_receiver) = broadcast::channel(config.global_buffer_capacity);
        Self {
            next_sequence: AtomicU64::new(0),
            config,
            screen_senders: RwLock::new(HashMap::new()),
            global_sender,
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<UpdatePacket> {
        self.global_sender.subscribe()
    }

    pub fn subscribe_screen(&self, screen_id: ScreenId) -> broadcast::Receiver<UpdatePacket> {
        if let Some(sender) = self.screen_sender(&screen_id) {
            return sender.subscribe();
        }

        let mut screen_senders = self
            .screen_senders
            .write()
            .expect("update bus screen sender lock poisoned");
        let sender = screen_senders.entry(screen_id).or_insert_with(|| {
            let (sender, _receiver) = broadcast::channel(self.config.screen_buffer_capacity);
            sender
        });
        sender.subscribe()
    }

    /// Drops the screen channel, closing all of its subscriptions. Returns
    /// whether a channel existed.
    pub fn remove_screen(&self, screen_id: &ScreenId) -> bool {
        let mut screen_senders = self
            .screen_senders
            .write()
            .expect("update bus screen sender lock poisoned");
        screen_senders.remove(screen_id).is_some()
    }

    /// Publish a packet to the global channel and to every screen channel
    /// that one of its records targets. Empty packets are dropped. Returns
    /// the packet's bus sequence number, or `None` when nothing was sent.
    pub fn publish(&self, packet: UpdatePacket) -> Option<u64> {
        if packet.is_empty() {
            return None;
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;

        let mut screen_targets: Vec<ScreenId> = Vec::new();
        for update in &packet.updates {
            if let Some(screen_id) = update.screen_id() {
                if !screen_targets.contains(screen_id) {
                    screen_targets.push(screen_id.clone());
                }
            }
        }

        for screen_id in screen_targets {
            if let Some(sender) = self.screen_sender(&screen_id) {
                if sender.receiver_count() > 0 {
                    let _ = sender.send(packet.clone());
                }
            }
        }
        if self.global_sender.receiver_count() > 0 {
            let _ = self.global_sender.send(packet);
        }
        Some(sequence)
    }

    fn screen_sender(&self, screen_id: &ScreenId) -> Option<broadcast::Sender<UpdatePacket>> {
        let screen_senders = self
            .screen_senders
            .read()
            .expect("update bus screen sender lock poisoned");
        screen_senders.get(screen_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use termbench_model::{
        ActiveSessionIdUpdate, Line, LineId, ScreenId, SessionId, UpdatePacket, UpdateRecord,
    };
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::timeout;

    use super::{UpdateBus, UpdateBusConfig};

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    fn line_packet(screen: &str, line: &str) -> UpdatePacket {
        let mut packet = UpdatePacket::new();
        packet.add_update(UpdateRecord::Line(Line::removal(
            ScreenId::new(screen),
            LineId::new(line),
        )));
        packet
    }

    #[test]
    fn empty_packets_are_not_published() {
        let bus = UpdateBus::default();
        assert_eq!(bus.publish(UpdatePacket::new()), None);
    }

    #[test]
    fn publish_allocates_monotonic_sequence_numbers() {
        let bus = UpdateBus::default();
        let first = bus.publish(line_packet("scr-a", "l1")).expect("first publish");
        let second = bus.publish(line_packet("scr-a", "l2")).expect("second publish");
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn publish_fans_out_to_screen_and_global_subscribers() {
        let bus = UpdateBus::default();
        let screen_id = ScreenId::new("scr-a");
        let mut screen_subscriber = bus.subscribe_screen(screen_id.clone());
        let mut global_subscriber = bus.subscribe_all();

        let packet = line_packet("scr-a", "l1");
        bus.publish(packet.clone()).expect("publish");

        let from_screen = timeout(TEST_TIMEOUT, screen_subscriber.recv())
            .await
            .expect("screen recv timed out")
            .expect("screen recv should succeed");
        let from_global = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect("global recv should succeed");

        assert_eq!(from_screen, packet);
        assert_eq!(from_global, packet);
    }

    #[tokio::test]
    async fn screen_subscriptions_only_receive_matching_screen_packets() {
        let bus = UpdateBus::default();
        let mut subscriber_a = bus.subscribe_screen(ScreenId::new("scr-a"));

        bus.publish(line_packet("scr-b", "l1")).expect("publish b");
        let packet_a = line_packet("scr-a", "l2");
        bus.publish(packet_a.clone()).expect("publish a");

        let received = timeout(TEST_TIMEOUT, subscriber_a.recv())
            .await
            .expect("screen recv timed out")
            .expect("screen recv should succeed");
        assert_eq!(received, packet_a);
    }

    #[tokio::test]
    async fn global_only_records_skip_screen_channels() {
        let bus = UpdateBus::default();
        let mut screen_subscriber = bus.subscribe_screen(ScreenId::new("scr-a"));
        let mut global_subscriber = bus.subscribe_all();

        let mut packet = UpdatePacket::new();
        packet.add_update(UpdateRecord::ActiveSessionId(ActiveSessionIdUpdate {
            session_id: SessionId::new("sess-1"),
        }));
        bus.publish(packet.clone()).expect("publish");

        let from_global = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect("global recv should succeed");
        assert_eq!(from_global, packet);

        // screen channel stays quiet; publishing a screen packet afterwards
        // proves nothing was buffered ahead of it
        let packet_a = line_packet("scr-a", "l1");
        bus.publish(packet_a.clone()).expect("publish screen packet");
        let received = timeout(TEST_TIMEOUT, screen_subscriber.recv())
            .await
            .expect("screen recv timed out")
            .expect("screen recv should succeed");
        assert_eq!(received, packet_a);
    }

    #[tokio::test]
    async fn bounded_queue_reports_lag_for_slow_global_subscriber() {
        let bus = UpdateBus::new(UpdateBusConfig {
            screen_buffer_capacity: 1,
            global_buffer_capacity: 1,
        });
        let mut global_subscriber = bus.subscribe_all();

        for idx in 0..8 {
            bus.publish(line_packet("scr-a", &format!("l{idx}")))
                .expect("publish");
        }

        let lagged = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect_err("expected lagged receiver due to bounded buffer");

        match lagged {
            RecvError::Lagged(skipped) => assert!(skipped >= 1),
            RecvError::Closed => panic!("global channel unexpectedly closed"),
        }
    }

    #[tokio::test]
    async fn remove_screen_closes_existing_screen_subscribers() {
        let bus = UpdateBus::default();
        let screen_id = ScreenId::new("scr-a");
        let mut screen_subscriber = bus.subscribe_screen(screen_id.clone());

        assert!(bus.remove_screen(&screen_id));
        assert!(!bus.remove_screen(&screen_id));

        let closed = timeout(TEST_TIMEOUT, screen_subscriber.recv())
            .await
            .expect("screen recv timed out")
            .expect_err("screen subscription should close after remove_screen");
        assert!(matches!(closed, RecvError::Closed));
    }
}
