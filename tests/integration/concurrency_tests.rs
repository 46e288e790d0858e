//! Handle lifetime and call serialization across threads.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use wsi_pyramid::{run_with_timeout, Slide, SlideError};

use super::test_utils::*;

fn slow_slide(delay_ms: u64, counters: &Arc<InFlight>) -> Slide {
    let backend = SlowBackend {
        delay: Duration::from_millis(delay_ms),
        counters: Arc::clone(counters),
    };
    Slide::from_backend("slow.sdpc", Box::new(backend), None).unwrap()
}

/// Run `reads` region reads on each slide, every slide on `per_slide`
/// threads, all released together.
fn hammer(slides: &[Arc<Slide>], per_slide: usize, reads: usize) {
    let barrier = Arc::new(Barrier::new(slides.len() * per_slide));
    let handles: Vec<_> = slides
        .iter()
        .flat_map(|slide| (0..per_slide).map(move |_| Arc::clone(slide)))
        .enumerate()
        .map(|(i, slide)| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for r in 0..reads {
                    let x = (i * 16 + r) as i64;
                    let px = slide.read_region((x, 0), 0, (2, 2)).unwrap();
                    assert_eq!(px.dimensions(), (2, 2));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

// =============================================================================
// Serialization
// =============================================================================

#[test]
fn test_calls_on_one_slide_never_overlap() {
    let counters = Arc::new(InFlight::default());
    let slide = Arc::new(slow_slide(5, &counters));

    hammer(&[slide], 4, 5);

    assert_eq!(counters.calls.load(Ordering::SeqCst), 20);
    assert_eq!(counters.peak(), 1);
}

#[test]
fn test_distinct_slides_read_in_parallel() {
    let counters = Arc::new(InFlight::default());
    let a = Arc::new(slow_slide(50, &counters));
    let b = Arc::new(slow_slide(50, &counters));

    hammer(&[a, b], 1, 3);

    assert_eq!(counters.calls.load(Ordering::SeqCst), 6);
    assert_eq!(counters.peak(), 2);
}

// =============================================================================
// Lifetime
// =============================================================================

#[test]
fn test_close_is_idempotent_and_final() {
    let counters = Arc::new(InFlight::default());
    let slide = slow_slide(0, &counters);

    slide.read_region((0, 0), 0, (1, 1)).unwrap();
    slide.close();
    slide.close();

    assert!(slide.is_closed());
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

    assert!(matches!(
        slide.read_region((0, 0), 0, (1, 1)),
        Err(SlideError::HandleClosed { .. })
    ));
    assert!(matches!(slide.dimensions(), Err(SlideError::HandleClosed { .. })));
    assert!(matches!(slide.properties(), Err(SlideError::HandleClosed { .. })));
    assert!(matches!(
        slide.get_thumbnail((10, 10)),
        Err(SlideError::HandleClosed { .. })
    ));

    drop(slide);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_releases_backend() {
    let counters = Arc::new(InFlight::default());
    let slide = slow_slide(0, &counters);
    drop(slide);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_close_waits_for_in_flight_read() {
    let counters = Arc::new(InFlight::default());
    let slide = Arc::new(slow_slide(100, &counters));

    let reader = {
        let slide = Arc::clone(&slide);
        thread::spawn(move || slide.read_region((0, 0), 0, (4, 4)))
    };
    thread::sleep(Duration::from_millis(20));
    slide.close();

    // The read that was already running completes normally
    assert_eq!(reader.join().unwrap().unwrap().dimensions(), (4, 4));
    assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test]
async fn test_timed_out_read_leaves_slide_usable() {
    let counters = Arc::new(InFlight::default());
    let slide = Arc::new(slow_slide(150, &counters));

    let s = Arc::clone(&slide);
    let err = run_with_timeout(slide.format(), Some(Duration::from_millis(10)), move || {
        s.read_region((0, 0), 0, (8, 8))
    })
    .await
    .unwrap_err();
    assert!(matches!(err, SlideError::BackendIo { fatal: false, .. }));

    // The next call queues behind the abandoned one, then succeeds
    let s = Arc::clone(&slide);
    let pixels = run_with_timeout(slide.format(), None, move || {
        s.read_region((0, 0), 0, (8, 8))
    })
    .await
    .unwrap();
    assert_eq!(pixels.dimensions(), (8, 8));
    assert_eq!(counters.calls.load(Ordering::SeqCst), 2);
    assert_eq!(counters.peak(), 1);
}
