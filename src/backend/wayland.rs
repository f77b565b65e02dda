//! Wayland `ext-idle-notify-v1` backend.
//!
//! Subscribes to idle/resumed notifications for the seat at the configured
//! threshold. Notifications are collected into an inbox by the `Dispatch`
//! impls and applied to [`IdleState`] when the caller queries, so no event
//! loop runs behind the caller's back.

mod state;

use std::io;

use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use tracing::trace;
use wayland_client::Connection;
use wayland_client::Dispatch;
use wayland_client::EventQueue;
use wayland_client::Proxy;
use wayland_client::QueueHandle;
use wayland_client::backend::WaylandError;
use wayland_client::delegate_noop;
use wayland_client::globals::GlobalListContents;
use wayland_client::globals::registry_queue_init;
use wayland_client::protocol::wl_registry;
use wayland_client::protocol::wl_seat;
use wayland_protocols::ext::idle_notify::v1::client::ext_idle_notification_v1;
use wayland_protocols::ext::idle_notify::v1::client::ext_idle_notifier_v1;

pub use state::IdleEvent;
pub use state::IdleState;

use super::BackendError;
use super::IdleBackend;
use super::QueryError;
use super::degraded;
use super::unix_millis;
use crate::config::IdleThreshold;

/// Highest `wl_seat` version we know how to talk to.
const SEAT_VERSION: u32 = 7;

/// Dispatch target collecting inbound idle notifications in arrival order.
#[derive(Debug, Default)]
struct Inbox {
    events: Vec<IdleEvent>,
}

// Globals are read once by `registry_queue_init`
impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for Inbox {
    fn event(
        _state: &mut Self,
        _registry: &wl_registry::WlRegistry,
        _event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

delegate_noop!(Inbox: ignore wl_seat::WlSeat);
delegate_noop!(Inbox: ext_idle_notifier_v1::ExtIdleNotifierV1);

impl Dispatch<ext_idle_notification_v1::ExtIdleNotificationV1, ()> for Inbox {
    fn event(
        state: &mut Self,
        _notification: &ext_idle_notification_v1::ExtIdleNotificationV1,
        event: ext_idle_notification_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let at_ms = unix_millis();
        match event {
            ext_idle_notification_v1::Event::Idled => {
                state.events.push(IdleEvent::Idled { at_ms });
            }
            ext_idle_notification_v1::Event::Resumed => {
                state.events.push(IdleEvent::Resumed { at_ms });
            }
            _ => {}
        }
    }
}

/// Backend tracking idle state through `ext-idle-notify-v1`.
pub struct WaylandBackend {
    queue: EventQueue<Inbox>,
    inbox: Inbox,
    seat: wl_seat::WlSeat,
    notifier: ext_idle_notifier_v1::ExtIdleNotifierV1,
    notification: ext_idle_notification_v1::ExtIdleNotificationV1,
    state: IdleState,
}

impl WaylandBackend {
    /// Registry name.
    pub const NAME: &'static str = "wayland";

    /// Connect to the compositor named by the environment and subscribe to
    /// idle notifications.
    pub fn connect(threshold: IdleThreshold) -> Result<Self, BackendError> {
        let conn =
            Connection::connect_to_env().map_err(|e| BackendError::unavailable(Self::NAME, e))?;
        Self::from_connection(&conn, threshold)
    }

    /// Subscribe to idle notifications over an established connection.
    pub fn from_connection(
        conn: &Connection,
        threshold: IdleThreshold,
    ) -> Result<Self, BackendError> {
        // Fetches the registry and waits for the initial globals
        let (globals, queue) = registry_queue_init::<Inbox>(conn)
            .map_err(|e| BackendError::unavailable(Self::NAME, e))?;
        let qh = queue.handle();

        let seat = globals
            .bind::<wl_seat::WlSeat, _, _>(&qh, 1..=SEAT_VERSION, ())
            .map_err(|e| {
                debug!("Cannot bind wl_seat: {}", e);
                BackendError::CapabilityUnavailable("wl_seat")
            })?;

        let notifier = globals
            .bind::<ext_idle_notifier_v1::ExtIdleNotifierV1, _, _>(&qh, 1..=1, ())
            .map_err(|e| {
                debug!("Cannot bind ext_idle_notifier_v1: {}", e);
                BackendError::CapabilityUnavailable("ext_idle_notifier_v1")
            })?;

        let notification = notifier.get_idle_notification(threshold.as_millis_u32(), &seat, &qh, ());
        info!(
            "Subscribed to ext-idle-notify-v1 (seat v{}, threshold {})",
            seat.version(),
            threshold
        );

        let mut backend = Self {
            queue,
            inbox: Inbox::default(),
            seat,
            notifier,
            notification,
            state: IdleState::new(unix_millis(), threshold),
        };

        backend
            .drain()
            .map_err(|e| BackendError::unavailable(Self::NAME, e))?;

        Ok(backend)
    }

    /// Process whatever is already buffered on the connection without
    /// waiting for more, then apply the collected events in order.
    fn drain(&mut self) -> Result<usize, QueryError> {
        self.queue
            .flush()
            .map_err(|e| QueryError::Wayland(e.to_string()))?;

        // `None` means events are already queued and can be dispatched as is
        if let Some(guard) = self.queue.prepare_read() {
            match guard.read() {
                Ok(n) => trace!("Read {} Wayland messages", n),
                Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(QueryError::Wayland(e.to_string())),
            }
        }

        self.queue
            .dispatch_pending(&mut self.inbox)
            .map_err(|e| QueryError::Wayland(e.to_string()))?;

        let applied = self.inbox.events.len();
        self.state.apply_all(self.inbox.events.drain(..));
        Ok(applied)
    }

    /// Tracker state as of the last drain.
    pub fn state(&self) -> &IdleState {
        &self.state
    }
}

#[async_trait]
impl IdleBackend for WaylandBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn idle_seconds(&mut self) -> f64 {
        match self.drain() {
            Ok(applied) => {
                if applied > 0 {
                    debug!("Applied {} idle notifications", applied);
                }
                self.state.idle_seconds(unix_millis())
            }
            Err(e) => degraded(Self::NAME, &e),
        }
    }
}

impl Drop for WaylandBackend {
    fn drop(&mut self) {
        self.notification.destroy();
        self.notifier.destroy();
        if self.seat.version() >= 5 {
            self.seat.release();
        }

        if let Err(e) = self.queue.flush() {
            debug!("Failed to flush Wayland teardown: {}", e);
        }
        debug!("Disconnected from Wayland compositor");
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use std::time::Instant;

    use wayland_protocols::ext::idle_notify::v1::server::ext_idle_notification_v1::ExtIdleNotificationV1;
    use wayland_protocols::ext::idle_notify::v1::server::ext_idle_notifier_v1::ExtIdleNotifierV1;
    use wayland_server::Client;
    use wayland_server::DataInit;
    use wayland_server::Display;
    use wayland_server::DisplayHandle;
    use wayland_server::GlobalDispatch;
    use wayland_server::New;
    use wayland_server::backend::ClientData;
    use wayland_server::protocol::wl_seat::WlSeat;

    use super::*;

    /// What the in-process compositor should announce.
    #[derive(Clone, Copy)]
    struct Globals {
        seat: bool,
        notifier: bool,
    }

    enum Command {
        /// Emit events on every notification, then acknowledge once flushed.
        Send(Vec<IdleEvent>, mpsc::Sender<()>),
        /// Reply with the timeouts clients subscribed with.
        Timeouts(mpsc::Sender<Vec<u32>>),
        Stop,
    }

    #[derive(Default)]
    struct Compositor {
        notifications: Vec<ExtIdleNotificationV1>,
        timeouts: Vec<u32>,
    }

    struct TestClient;

    impl ClientData for TestClient {}

    impl GlobalDispatch<WlSeat, ()> for Compositor {
        fn bind(
            _state: &mut Self,
            _handle: &DisplayHandle,
            _client: &Client,
            resource: New<WlSeat>,
            _global_data: &(),
            data_init: &mut DataInit<'_, Self>,
        ) {
            data_init.init(resource, ());
        }
    }

    impl wayland_server::Dispatch<WlSeat, ()> for Compositor {
        fn request(
            _state: &mut Self,
            _client: &Client,
            _resource: &WlSeat,
            _request: wayland_server::protocol::wl_seat::Request,
            _data: &(),
            _dhandle: &DisplayHandle,
            _data_init: &mut DataInit<'_, Self>,
        ) {
        }
    }

    impl GlobalDispatch<ExtIdleNotifierV1, ()> for Compositor {
        fn bind(
            _state: &mut Self,
            _handle: &DisplayHandle,
            _client: &Client,
            resource: New<ExtIdleNotifierV1>,
            _global_data: &(),
            data_init: &mut DataInit<'_, Self>,
        ) {
            data_init.init(resource, ());
        }
    }

    impl wayland_server::Dispatch<ExtIdleNotifierV1, ()> for Compositor {
        fn request(
            state: &mut Self,
            _client: &Client,
            _resource: &ExtIdleNotifierV1,
            request: wayland_protocols::ext::idle_notify::v1::server::ext_idle_notifier_v1::Request,
            _data: &(),
            _dhandle: &DisplayHandle,
            data_init: &mut DataInit<'_, Self>,
        ) {
            use wayland_protocols::ext::idle_notify::v1::server::ext_idle_notifier_v1::Request;

            if let Request::GetIdleNotification { id, timeout, .. } = request {
                state.timeouts.push(timeout);
                state.notifications.push(data_init.init(id, ()));
            }
        }
    }

    impl wayland_server::Dispatch<ExtIdleNotificationV1, ()> for Compositor {
        fn request(
            _state: &mut Self,
            _client: &Client,
            _resource: &ExtIdleNotificationV1,
            _request: wayland_protocols::ext::idle_notify::v1::server::ext_idle_notification_v1::Request,
            _data: &(),
            _dhandle: &DisplayHandle,
            _data_init: &mut DataInit<'_, Self>,
        ) {
        }
    }

    /// Compositor running on its own thread, talking to one client socket.
    struct Server {
        commands: mpsc::Sender<Command>,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl Server {
        /// Start a compositor and return it with a client connection to it.
        fn start(globals: Globals) -> (Self, Connection) {
            let (client_sock, server_sock) = UnixStream::pair().expect("socket pair");
            let (commands, inbox) = mpsc::channel();

            let thread = thread::spawn(move || {
                let mut display = Display::<Compositor>::new().expect("display");
                let mut dh = display.handle();
                if globals.seat {
                    dh.create_global::<Compositor, WlSeat, ()>(SEAT_VERSION, ());
                }
                if globals.notifier {
                    dh.create_global::<Compositor, ExtIdleNotifierV1, ()>(1, ());
                }
                dh.insert_client(server_sock, Arc::new(TestClient))
                    .expect("insert client");

                let mut state = Compositor::default();
                loop {
                    pump(&mut display, &mut state);
                    match inbox.try_recv() {
                        Ok(Command::Send(events, ack)) => {
                            wait_for_notification(&mut display, &mut state);
                            for notification in &state.notifications {
                                for event in &events {
                                    match event {
                                        IdleEvent::Idled { .. } => notification.idled(),
                                        IdleEvent::Resumed { .. } => notification.resumed(),
                                    }
                                }
                            }
                            display.flush_clients().expect("flush");
                            ack.send(()).expect("ack");
                        }
                        Ok(Command::Timeouts(reply)) => {
                            wait_for_notification(&mut display, &mut state);
                            reply.send(state.timeouts.clone()).expect("reply");
                        }
                        Ok(Command::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                        Err(mpsc::TryRecvError::Empty) => thread::sleep(Duration::from_millis(1)),
                    }
                }
            });

            let conn = Connection::from_socket(client_sock).expect("client connection");
            let server = Self {
                commands,
                thread: Some(thread),
            };
            (server, conn)
        }

        /// Emit `events` and return once they are on the client's socket.
        fn send(&self, events: Vec<IdleEvent>) {
            let (ack, done) = mpsc::channel();
            self.commands
                .send(Command::Send(events, ack))
                .expect("server running");
            done.recv_timeout(Duration::from_secs(5)).expect("events sent");
        }

        fn timeouts(&self) -> Vec<u32> {
            let (reply, answer) = mpsc::channel();
            self.commands
                .send(Command::Timeouts(reply))
                .expect("server running");
            answer.recv_timeout(Duration::from_secs(5)).expect("timeouts")
        }
    }

    impl Drop for Server {
        fn drop(&mut self) {
            let _ = self.commands.send(Command::Stop);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn pump(display: &mut Display<Compositor>, state: &mut Compositor) {
        // A disconnected client is not an error for the compositor
        let _ = display.dispatch_clients(state);
        let _ = display.flush_clients();
    }

    /// Dispatch until the client has asked for its notification.
    fn wait_for_notification(display: &mut Display<Compositor>, state: &mut Compositor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while state.notifications.is_empty() && Instant::now() < deadline {
            pump(display, state);
            thread::sleep(Duration::from_millis(1));
        }
    }

    const BOTH: Globals = Globals {
        seat: true,
        notifier: true,
    };

    #[test]
    #[ignore] // Requires a compositor with ext-idle-notify-v1
    fn test_connect_and_query() {
        let mut backend =
            WaylandBackend::connect(IdleThreshold::from_secs(1)).expect("Wayland compositor");
        assert!(backend.drain().is_ok());
        assert!(backend.state().idle_seconds(unix_millis()) >= 0.0);
    }

    #[test]
    fn test_missing_notifier_is_capability_error() {
        let (_server, conn) = Server::start(Globals {
            seat: true,
            notifier: false,
        });

        let err = WaylandBackend::from_connection(&conn, IdleThreshold::from_secs(60))
            .err()
            .expect("construction fails");
        assert!(matches!(
            err,
            BackendError::CapabilityUnavailable("ext_idle_notifier_v1")
        ));
    }

    #[test]
    fn test_missing_seat_is_capability_error() {
        let (_server, conn) = Server::start(Globals {
            seat: false,
            notifier: true,
        });

        let err = WaylandBackend::from_connection(&conn, IdleThreshold::from_secs(60))
            .err()
            .expect("construction fails");
        assert!(matches!(err, BackendError::CapabilityUnavailable("wl_seat")));
    }

    #[test]
    fn test_subscribes_with_threshold_in_millis() {
        let (server, conn) = Server::start(BOTH);
        let backend =
            WaylandBackend::from_connection(&conn, IdleThreshold::from_secs(90)).expect("backend");

        assert_eq!(server.timeouts(), [90_000]);
        assert!(!backend.state().is_idle());
    }

    #[test]
    fn test_drain_applies_compositor_events_in_order() {
        let threshold = IdleThreshold::from_secs(60);
        let (server, conn) = Server::start(BOTH);
        let mut backend = WaylandBackend::from_connection(&conn, threshold).expect("backend");

        server.send(vec![
            IdleEvent::Idled { at_ms: 0 },
            IdleEvent::Resumed { at_ms: 0 },
            IdleEvent::Idled { at_ms: 0 },
        ]);

        let before = unix_millis();
        let applied = backend.drain().expect("drain");
        let after = unix_millis();

        assert_eq!(applied, 3);
        let state = backend.state().clone();
        assert!(state.is_idle());
        // Events are stamped when dispatched, not when the compositor sent them
        let since = state.idle_since_ms().expect("idle");
        assert!((before..=after).contains(&since));
        assert!((before..=after).contains(&state.last_activity_ms()));
        assert!(state.idle_seconds(after) >= 60.0);

        // Nothing new on the socket: the second drain is a no-op
        assert_eq!(backend.drain().expect("drain"), 0);
        assert_eq!(backend.state(), &state);
    }

    #[test]
    fn test_inbox_keeps_arrival_order() {
        let mut inbox = Inbox::default();
        inbox.events.push(IdleEvent::Idled { at_ms: 1 });
        inbox.events.push(IdleEvent::Resumed { at_ms: 2 });
        inbox.events.push(IdleEvent::Idled { at_ms: 3 });

        let mut state = IdleState::new(0, IdleThreshold::from_secs(60));
        state.apply_all(inbox.events.drain(..));

        assert!(inbox.events.is_empty());
        assert_eq!(state.idle_since_ms(), Some(3));
        assert_eq!(state.last_activity_ms(), 2);
    }
}
