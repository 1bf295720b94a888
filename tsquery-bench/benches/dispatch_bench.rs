//! Dispatcher benchmarks: command round trips and notification routing
//! through the state machine, without any I/O.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tsquery_client::{Command, Dispatcher, DispatcherConfig};

fn ready_dispatcher() -> (Dispatcher, broadcast::Receiver<tsquery_client::QueryEvent>) {
    let (events, rx) = broadcast::channel(1024);
    let config = DispatcherConfig {
        keep_alive: false,
        ..DispatcherConfig::default()
    };
    let mut dispatcher = Dispatcher::new(config, events);
    let now = Instant::now();
    dispatcher.begin_connect().unwrap();
    dispatcher.on_connected(now);
    dispatcher.on_line("TS3", now);
    dispatcher.on_line("Welcome to the ServerQuery interface", now);
    (dispatcher, rx)
}

fn bench_round_trips(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trips");

    for commands in [1, 10, 100] {
        group.throughput(Throughput::Elements(commands as u64));
        group.bench_with_input(BenchmarkId::from_parameter(commands), &commands, |b, &commands| {
            b.iter(|| {
                let (mut dispatcher, _events) = ready_dispatcher();
                let now = Instant::now();
                let mut replies = Vec::with_capacity(commands);
                for i in 0..commands {
                    let (tx, rx) = oneshot::channel();
                    let command = Command::new("clientinfo").with_option("clid", i as i64);
                    dispatcher.enqueue(command, false, tx, now);
                    replies.push(rx);
                }
                for _ in 0..commands {
                    while dispatcher.poll_outgoing().is_some() {}
                    dispatcher.on_line("cid=1 client_nickname=bench client_away=0", now);
                    dispatcher.on_line("error id=0 msg=ok", now);
                }
                black_box(replies)
            });
        });
    }

    group.finish();
}

fn bench_notifications(c: &mut Criterion) {
    let mut group = c.benchmark_group("notifications");
    let lines = [
        "notifyclientmoved ctid=5 reasonid=0 clid=7",
        "notifyclientmoved ctid=5 reasonid=0 clid=7",
        "notifytextmessage targetmode=3 msg=hello\\sworld invokerid=1 invokername=bench",
    ];

    group.throughput(Throughput::Elements(lines.len() as u64));
    group.bench_function("route", |b| {
        let (mut dispatcher, mut events) = ready_dispatcher();
        let now = Instant::now();
        b.iter(|| {
            for line in lines {
                dispatcher.on_line(line, now);
            }
            while events.try_recv().is_ok() {}
        });
    });

    group.finish();
}

criterion_group!(benches, bench_round_trips, bench_notifications);

criterion_main!(benches);
