//! Benchmarks for template rendering and log scanning.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hostwall::iprange::IpRange;
use hostwall::pattern::PatternDefinition;
use hostwall::ports::{PortSpec, Protocol};
use hostwall::rule::Direction;
use hostwall::template::{RenderContext, Template};
use std::hint::black_box;

const TEMPLATE: &str = "\
# Generic accept rule
$IPTABLES -A $CHAIN $DEV -p $PROTO --dport $PORT $ADDRESS -j ACCEPT
$IPTABLES -A $CHAIN $DEV $SRC -j LOG
";

/// Generate a mix of IPv4 hosts and IPv6 prefixes
fn generate_ranges(count: usize) -> Vec<IpRange> {
    (0..count)
        .map(|i| {
            let text = if i % 2 == 0 {
                format!("10.{}.{}.{}", (i >> 16) % 256, (i >> 8) % 256, i % 256)
            } else {
                format!("2001:db8:{:x}::/48", i % 65536)
            };
            IpRange::parse(&text).unwrap()
        })
        .collect()
}

fn generate_ports(count: usize) -> Vec<PortSpec> {
    (0..count)
        .map(|i| {
            let protocol = if i % 2 == 0 { Protocol::Tcp } else { Protocol::Udp };
            PortSpec::new(1000 + i as u16, protocol)
        })
        .collect()
}

fn bench_render(c: &mut Criterion) {
    let template = Template::parse("accept.incoming", TEMPLATE);
    let mut group = c.benchmark_group("render");

    for ports in [1, 8, 64] {
        let specs = generate_ports(ports);
        let ranges = generate_ranges(1000);
        group.bench_with_input(BenchmarkId::new("ranges_1000", ports), &specs, |b, specs| {
            b.iter(|| {
                let mut total = 0;
                for range in &ranges {
                    let ctx = RenderContext {
                        name: "bench",
                        direction: Direction::Incoming,
                        chain: "INPUT",
                        address: Some(range),
                        device: Some("eth0"),
                        ports: specs,
                    };
                    total += template.render(&ctx).len();
                }
                black_box(total)
            });
        });
    }

    group.finish();
}

fn bench_parse_range(c: &mut Criterion) {
    let inputs = ["192.0.2.1", "198.51.100.0/24", "2001:ba8:123:0::12/56", "::ffff:192.0.2.1"];
    c.bench_function("parse_range", |b| {
        b.iter(|| {
            for input in &inputs {
                black_box(IpRange::parse(black_box(input)).ok());
            }
        });
    });
}

fn bench_pattern(c: &mut Criterion) {
    let pattern = PatternDefinition::new(
        "ssh",
        r"sshd\[\d+\]: Failed password for \S+ from __IP__ port \d+ ssh2",
    )
    .unwrap();

    let lines: Vec<String> = (0..10000)
        .map(|i| {
            if i % 10 == 0 {
                format!(
                    "Jul  2 08:00:00 host sshd[{}]: Failed password for root from 192.0.2.{} port {} ssh2",
                    i,
                    i % 256,
                    40000 + i % 20000
                )
            } else {
                format!("Jul  2 08:00:00 host CRON[{}]: session opened for user root", i)
            }
        })
        .collect();

    c.bench_function("pattern_10000_lines", |b| {
        b.iter(|| black_box(lines.iter().filter_map(|l| pattern.apply(l)).count()));
    });
}

criterion_group!(benches, bench_render, bench_parse_range, bench_pattern);
criterion_main!(benches);
