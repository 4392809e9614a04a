use criterion::{BatchSize, Criterion, Throughput};
use nodehelper::network::application::mqtt::{Client, Options, QoS};
use nodehelper::network::error::Error;
use nodehelper::network::{Close, Connection, Read, Write};
use std::hint::black_box;

/// Connection that discards writes and replays `inbox`, then idles.
struct Loopback {
    inbox: Vec<u8>,
    pos: usize,
}

impl Read for Loopback {
    type Error = Error;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.pos == self.inbox.len() {
            return Err(Error::Timeout);
        }
        let n = buf.len().min(self.inbox.len() - self.pos);
        buf[..n].copy_from_slice(&self.inbox[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for Loopback {
    type Error = Error;
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for Loopback {
    type Error = Error;
    fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Connection for Loopback {}

const TOPIC: &str = "/raw/esp8266/1234567/in";

fn setup_client(inbox: Vec<u8>) -> Client<Loopback> {
    let mut script = vec![0x20, 0x02, 0x00, 0x00];
    script.extend(inbox);
    let opts = Options {
        client_id: "esp8266-1234567",
        keep_alive_seconds: 15,
        clean_session: true,
        username: None,
        password: None,
    };
    Client::connect(Loopback { inbox: script, pos: 0 }, opts).expect("Failed to connect")
}

fn inbound(payload: &[u8], count: usize) -> Vec<u8> {
    let len = 2 + TOPIC.len() + payload.len();
    let mut packet = vec![0x30, len as u8];
    packet.extend_from_slice(&(TOPIC.len() as u16).to_be_bytes());
    packet.extend_from_slice(TOPIC.as_bytes());
    packet.extend_from_slice(payload);
    packet.repeat(count)
}

pub fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("mqtt");
    let payload = b"{\"position\":42}";
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("publish", |b| {
        let mut client = setup_client(Vec::new());
        b.iter(|| {
            client
                .publish(TOPIC, black_box(payload), QoS::AtMostOnce)
                .expect("Failed to publish");
        })
    });
    group.finish();
}

pub fn bench_poll(c: &mut Criterion) {
    const MESSAGES: usize = 50;
    let mut group = c.benchmark_group("mqtt");
    let payload = b"{\"position\":42}";
    group.throughput(Throughput::Bytes((payload.len() * MESSAGES) as u64));
    group.bench_function("poll", |b| {
        b.iter_batched_ref(
            || setup_client(inbound(payload, MESSAGES)),
            |client| {
                for _ in 0..MESSAGES {
                    black_box(client.poll(0).expect("Failed to poll"));
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}
