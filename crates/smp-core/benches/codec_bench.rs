use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand_core::OsRng;
use smp_core::agent::envelope::{CONFIRMATION_PADDED_LEN, ClientMessage, pad_block};
use smp_core::parser::parse_incoming;
use smp_core::transmission::{Command, build_transmission, encode_response_block, parse_response_block};
use smp_crypto::signatures::SigningKey;
use smp_crypto::x25519;

fn bench_build_transmission(c: &mut Criterion) {
    let key = SigningKey::generate(&mut OsRng);
    let body = vec![0x42u8; 16000];
    let command = Command::Send {
        notify: true,
        body: &body,
    };

    let mut group = c.benchmark_group("build_transmission");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("send_unsigned", |b| {
        b.iter(|| build_transmission(&[7u8; 32], &[1u8; 24], &[2u8; 24], black_box(&command), None))
    });
    group.bench_function("send_signed", |b| {
        b.iter(|| build_transmission(&[7u8; 32], &[1u8; 24], &[2u8; 24], black_box(&command), Some(&key)))
    });
    group.finish();
}

fn bench_parse_response(c: &mut Criterion) {
    let mut msg = b"MSG ".to_vec();
    msg.push(24);
    msg.extend_from_slice(&[3u8; 24]);
    msg.extend_from_slice(&[0x55u8; 16100]);
    let block = encode_response_block(&[7u8; 32], &[(&[][..], &[2u8; 24][..], msg)]).unwrap();

    c.bench_function("parse_response_msg", |b| {
        b.iter(|| parse_response_block(black_box(&block)))
    });
}

fn bench_parse_incoming(c: &mut Criterion) {
    let queue = x25519::PrivateKey::generate(&mut OsRng);
    let sender = x25519::PrivateKey::generate(&mut OsRng);
    let body = pad_block(b"_\x00\x05C1", CONFIRMATION_PADDED_LEN).unwrap();
    let message = ClientMessage::seal(&body, &queue.public_key(), &sender)
        .unwrap()
        .encode()
        .unwrap();

    c.bench_function("parse_incoming_confirmation", |b| {
        b.iter(|| parse_incoming(black_box(&message), &queue))
    });
}

criterion_group!(
    benches,
    bench_build_transmission,
    bench_parse_response,
    bench_parse_incoming
);
criterion_main!(benches);
