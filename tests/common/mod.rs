use std::os::unix::net::UnixDatagram;
use std::time;

use rand::Rng;

pub const STEP_TIMEOUT: time::Duration = time::Duration::from_millis(1);

/// A client with `link_count` links to a server, both on loopback, each with a local port backed
/// by a non-blocking datagram socket pair.
pub struct Harness {
    pub client: linkbond::Channel,
    pub server: linkbond::ChannelServer,
    // Ports handed to the channels
    pub client_port: UnixDatagram,
    pub server_port: UnixDatagram,
    // Application ends of the ports
    pub client_app: UnixDatagram,
    pub server_app: UnixDatagram,
}

fn port_pair() -> (UnixDatagram, UnixDatagram) {
    let (port, app) = UnixDatagram::pair().expect("failed to create port pair");
    port.set_nonblocking(true).unwrap();
    app.set_nonblocking(true).unwrap();
    (port, app)
}

impl Harness {
    pub fn new(link_count: usize) -> Self {
        let server = linkbond::ChannelServer::bind(("127.0.0.1", 0))
            .expect("failed to create server");
        let server_addr = server.local_addr();

        let mut client = linkbond::Channel::new().expect("failed to create client");
        for _ in 0..link_count {
            client
                .add_link(("127.0.0.1", 0), server_addr)
                .expect("failed to add link");
        }

        let (client_port, client_app) = port_pair();
        let (server_port, server_app) = port_pair();

        Self {
            client,
            server,
            client_port,
            server_port,
            client_app,
            server_app,
        }
    }

    pub fn step(&mut self) {
        self.client
            .step(&mut self.client_port, STEP_TIMEOUT)
            .expect("client step failed");
        self.server
            .step(&mut self.server_port, STEP_TIMEOUT)
            .expect("server step failed");
    }

    /// Steps both ends for `duration`.
    pub fn step_for(&mut self, duration: time::Duration) {
        let deadline = time::Instant::now() + duration;
        while time::Instant::now() < deadline {
            self.step();
        }
    }
}

/// Reads every packet currently queued on a non-blocking app socket.
pub fn drain(app: &UnixDatagram, out: &mut Vec<Box<[u8]>>) {
    let mut buf = [0u8; 4096];
    while let Ok(len) = app.recv(&mut buf) {
        out.push(buf[..len].into());
    }
}

pub fn random_payloads(count: usize, size_max: usize) -> Vec<Box<[u8]>> {
    let mut rng = rand::thread_rng();

    (0..count)
        .map(|_| {
            let mut payload = vec![0u8; rng.gen_range(1..=size_max)];
            rng.fill(&mut payload[..]);
            payload.into_boxed_slice()
        })
        .collect()
}

/// Sorted payload digests, for comparison regardless of arrival order.
pub fn digests(payloads: &[Box<[u8]>]) -> Vec<[u8; 16]> {
    let mut digests: Vec<[u8; 16]> = payloads.iter().map(|p| md5::compute(p).0).collect();
    digests.sort();
    digests
}
