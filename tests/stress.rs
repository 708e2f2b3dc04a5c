//! Stress tests for Plexus
//!
//! Run with: cargo test --release stress -- --ignored

use plexus::*;
use std::time::Instant;

#[test]
#[ignore] // Run manually with --ignored
fn stress_test_enqueue_flush() {
    let config = ClientConfig {
        flush_count: 16,
        flush_interval_ms: 0,
        json_buffer_size: 4096,
        ..Default::default()
    };
    let mut client = Client::with_config(MockHal::new(), "key", "stress", config).unwrap();

    let iterations = 1_000_000;
    let start = Instant::now();

    for i in 0..iterations {
        client.enqueue_number("temperature", 20.0 + (i as f64 * 0.001).sin()).unwrap();
        if i % 10_000 == 0 {
            client.hal_mut().clear_history();
        }
    }

    let elapsed = start.elapsed();
    let rate = iterations as f64 / elapsed.as_secs_f64();

    println!("Queued and delivered {} metrics in {:?}", iterations, elapsed);
    println!("Rate: {:.0} metrics/second", rate);

    assert_eq!(client.total_sent() as usize + client.pending_count(), iterations);
    assert!(
        rate > 100_000.0,
        "Should handle at least 100k metrics/s, got {:.0}",
        rate
    );
}

#[test]
#[ignore]
fn stress_test_flapping_network() {
    let config = ClientConfig {
        persistent_buffer: true,
        ..ClientConfig::manual_flush()
    };
    let mut client = Client::with_config(MockHal::new(), "key", "stress", config).unwrap();

    let rounds = 10_000u32;
    let mut delivered_live = 0u32;

    for round in 0..rounds {
        let online = round % 3 == 0;
        client.hal_mut().set_post_result(if online {
            Ok(())
        } else {
            Err(TransportError::Network)
        });
        client.enqueue_number("seq", f64::from(round)).unwrap();
        if client.flush().is_ok() {
            delivered_live += 1;
        }
        assert!(client.persisted_batches() <= 8);
        client.hal_mut().clear_history();
    }

    println!(
        "{} of {} rounds delivered live, {} errors",
        delivered_live,
        rounds,
        client.total_errors()
    );
    assert_eq!(client.total_sent(), delivered_live);
    assert_eq!(client.total_errors(), rounds - delivered_live);
}
