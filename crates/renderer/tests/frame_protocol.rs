//! Integration tests for the begin-frame/end-frame protocol, driven through a
//! scripted GPU.

mod common;

use common::{Call, builds, context, log_len, log_since, run_frame};
use framepace_renderer::{BackendState, Extent, FrameStatus};

#[test]
fn test_cold_start_does_not_block() {
    let (mut context, state) = context(2, 3, 240, 240);

    assert_eq!(context.image_count(), 3);
    assert_eq!(context.max_frames_in_flight(), 2);
    assert_eq!(context.extent(), Extent::new(240, 240));

    let start = log_len(&state);
    run_frame(&mut context);

    assert_eq!(
        log_since(&state, start),
        [
            Call::FenceWait {
                fence: 0,
                blocked: false
            },
            Call::Acquire { semaphore: 0 },
            Call::BeginRecording(0),
            Call::Object(0),
            Call::EndRecording(0),
            Call::FenceReset(0),
            Call::Submit {
                image: 0,
                wait: 0,
                signal: 2,
                fence: 0
            },
            Call::Present {
                image: 0,
                semaphore: 2
            },
        ]
    );
    assert_eq!(context.state(), BackendState::Ready);
}

#[test]
fn test_initialize_creates_signaled_fences() {
    let (context, state) = context(2, 3, 240, 240);

    let log = log_since(&state, 0);
    assert_eq!(log[0], Call::Build {
        width: 240,
        height: 240
    });
    let fences: Vec<_> = log
        .iter()
        .filter(|call| matches!(call, Call::CreateFence { .. }))
        .collect();
    assert_eq!(fences.len(), 2);
    assert!(
        fences
            .iter()
            .all(|call| matches!(call, Call::CreateFence { signaled: true, .. }))
    );
    assert_eq!(context.fence_count(), 2);
    assert_eq!(context.semaphore_pair_count(), 2);
    assert_eq!(context.state(), BackendState::Initialized);
}

#[test]
fn test_frame_index_is_cyclic() {
    let (mut context, _state) = context(2, 3, 240, 240);
    let frames = context.max_frames_in_flight();

    for n in 1..=3 * frames {
        run_frame(&mut context);
        assert_eq!(context.current_frame(), n % frames);
    }
    assert_eq!(context.current_frame(), 0);
    assert_eq!(context.frame_number(), 3 * frames as u64);
}

#[test]
fn test_image_guarded_by_other_slot_is_waited_on() {
    // 3 images over 2 slots: frame 3 lands on image 0, last drawn by slot 0
    let (mut context, state) = context(2, 3, 240, 240);
    for _ in 0..3 {
        run_frame(&mut context);
    }
    assert_eq!(context.images_in_flight(), &[Some(0), Some(1), Some(0)]);

    let start = log_len(&state);
    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Proceed);

    assert_eq!(
        log_since(&state, start),
        [
            Call::FenceWait {
                fence: 1,
                blocked: true
            },
            Call::Acquire { semaphore: 1 },
            Call::FenceWait {
                fence: 0,
                blocked: true
            },
            Call::BeginRecording(0),
        ]
    );
    assert_eq!(context.image_index(), 0);
    assert_eq!(context.images_in_flight()[0], Some(1));
    context.end_frame(0.016).unwrap();
}

#[test]
fn test_fence_reset_immediately_before_submit() {
    let (mut context, state) = context(2, 3, 240, 240);
    for _ in 0..5 {
        run_frame(&mut context);
    }

    let log = log_since(&state, 0);
    let mut submits = 0;
    for (i, call) in log.iter().enumerate() {
        if let Call::Submit { fence, .. } = call {
            assert_eq!(log[i - 1], Call::FenceReset(*fence));
            submits += 1;
        }
    }
    let resets = log
        .iter()
        .filter(|call| matches!(call, Call::FenceReset(_)))
        .count();
    assert_eq!(submits, 5);
    assert_eq!(resets, submits);
}

#[test]
fn test_resizes_coalesce_into_one_rebuild() {
    let (mut context, state) = context(2, 3, 240, 240);
    for _ in 0..10 {
        run_frame(&mut context);
    }

    context.resize(100, 100);
    context.resize(200, 200);
    assert_eq!(context.pending_resize().generation, 2);
    assert_eq!(builds(&state), [(240, 240)]);

    let start = log_len(&state);
    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Skip);
    assert_eq!(
        log_since(&state, start),
        [
            Call::WaitIdle,
            Call::Build {
                width: 200,
                height: 200
            },
        ]
    );
    assert_eq!(context.extent(), Extent::new(200, 200));
    assert_eq!(context.swapchain_generation(), 1);

    run_frame(&mut context);
    run_frame(&mut context);
    assert_eq!(builds(&state), [(240, 240), (200, 200)]);
}

#[test]
fn test_stale_acquire_rebuilds_and_skips() {
    let (mut context, state) = context(2, 3, 240, 240);
    state.borrow_mut().script.stale_acquires = vec![5];

    for _ in 0..4 {
        run_frame(&mut context);
    }
    let frame_before = context.current_frame();

    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Skip);
    assert_eq!(context.state(), BackendState::Ready);
    assert_eq!(context.current_frame(), frame_before);

    // Same chain, new image array
    assert_eq!(state.borrow().image_generation, 2);
    assert_eq!(context.swapchain_generation(), 1);
    assert_eq!(builds(&state), [(240, 240), (240, 240)]);
    assert!(context.images_in_flight().iter().all(Option::is_none));
    assert_eq!(context.fence_count(), 2);

    run_frame(&mut context);
    assert_eq!(context.image_index(), 0);
}

#[test]
fn test_stale_present_rebuilds_after_advancing() {
    let (mut context, state) = context(2, 3, 240, 240);
    state.borrow_mut().script.stale_presents = vec![1];

    let start = log_len(&state);
    run_frame(&mut context);

    let log = log_since(&state, start);
    let present = log
        .iter()
        .position(|call| matches!(call, Call::Present { .. }))
        .unwrap();
    assert_eq!(
        log[present + 1..],
        [
            Call::WaitIdle,
            Call::Build {
                width: 240,
                height: 240
            }
        ]
    );
    assert_eq!(context.current_frame(), 1);
    assert_eq!(context.swapchain_generation(), 1);
}

#[test]
fn test_resize_during_stale_frame_rebuilds_once() {
    let (mut context, state) = context(2, 3, 240, 240);
    state.borrow_mut().script.stale_presents = vec![1];

    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Proceed);
    context.resize(200, 200);
    context.end_frame(0.016).unwrap();
    assert_eq!(builds(&state), [(240, 240), (200, 200)]);
    assert!(!context.is_recreating());

    // The stale present already applied the pending size
    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Proceed);
    context.end_frame(0.016).unwrap();
    assert_eq!(builds(&state), [(240, 240), (200, 200)]);
    assert_eq!(context.extent(), Extent::new(200, 200));
    assert_eq!(context.swapchain_generation(), 1);
}

#[test]
fn test_shrinking_chain_drops_surplus_sync_objects() {
    let (mut context, state) = context(2, 3, 240, 240);
    run_frame(&mut context);
    assert_eq!(context.current_frame(), 1);

    state.borrow_mut().script.image_limits.push_back((1, 2));
    context.resize(300, 300);

    let start = log_len(&state);
    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Skip);
    assert_eq!(
        log_since(&state, start),
        [
            Call::WaitIdle,
            Call::Build {
                width: 300,
                height: 300
            },
            Call::DropFence(1),
            Call::DropSemaphore(1),
            Call::DropSemaphore(3),
        ]
    );

    assert_eq!(context.image_count(), 2);
    assert_eq!(context.max_frames_in_flight(), 1);
    assert_eq!(context.fence_count(), 1);
    assert_eq!(context.semaphore_pair_count(), 1);
    assert_eq!(context.images_in_flight().len(), 2);
    assert_eq!(context.current_frame(), 0);

    for _ in 0..3 {
        run_frame(&mut context);
        assert_eq!(context.current_frame(), 0);
    }
}

#[test]
fn test_growing_chain_adds_signaled_sync_objects() {
    let (mut context, state) = context(1, 2, 240, 240);
    assert_eq!(context.max_frames_in_flight(), 1);
    run_frame(&mut context);

    // No maximum: min + 1 images
    state.borrow_mut().script.image_limits.push_back((3, 0));
    context.resize(640, 480);

    let start = log_len(&state);
    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Skip);
    let log = log_since(&state, start);
    assert_eq!(
        log[..4],
        [
            Call::WaitIdle,
            Call::Build {
                width: 640,
                height: 480
            },
            Call::CreateFence {
                fence: 1,
                signaled: true
            },
            Call::CreateFence {
                fence: 2,
                signaled: true
            },
        ]
    );
    assert_eq!(
        log.iter()
            .filter(|call| matches!(call, Call::CreateSemaphore(_)))
            .count(),
        4
    );

    assert_eq!(context.image_count(), 4);
    assert_eq!(context.max_frames_in_flight(), 3);
    assert_eq!(context.fence_count(), 3);
    assert_eq!(context.semaphore_pair_count(), 3);

    // Fresh slots start signaled and never block
    let start = log_len(&state);
    run_frame(&mut context);
    run_frame(&mut context);
    let blocking_new = log_since(&state, start).into_iter().any(|call| {
        matches!(
            call,
            Call::FenceWait {
                fence: 1 | 2,
                blocked: true
            }
        )
    });
    assert!(!blocking_new);
}

#[test]
fn test_fence_timeout_skips_before_acquire() {
    let (mut context, state) = context(2, 3, 240, 240);
    run_frame(&mut context);
    run_frame(&mut context);
    state.borrow_mut().script.fence_timeouts = 1;

    let start = log_len(&state);
    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Skip);
    assert_eq!(
        log_since(&state, start),
        [Call::FenceWait {
            fence: 0,
            blocked: true
        }]
    );
    assert_eq!(context.current_frame(), 0);

    run_frame(&mut context);
}

#[test]
fn test_acquire_timeout_skips() {
    let (mut context, state) = context(2, 3, 240, 240);
    state.borrow_mut().script.timed_out_acquires = vec![1];

    assert_eq!(context.begin_frame(0.016).unwrap(), FrameStatus::Skip);
    assert_eq!(context.state(), BackendState::Initialized);
    assert!(
        !log_since(&state, 0)
            .iter()
            .any(|call| matches!(call, Call::BeginRecording(_)))
    );
    assert_eq!(builds(&state).len(), 1);

    run_frame(&mut context);
}

#[test]
fn test_shutdown_destroys_sync_objects_before_targets() {
    let (mut context, state) = context(2, 3, 240, 240);
    for _ in 0..3 {
        run_frame(&mut context);
    }

    let start = log_len(&state);
    context.shutdown().unwrap();
    assert_eq!(
        log_since(&state, start),
        [
            Call::WaitIdle,
            Call::DropFence(0),
            Call::DropFence(1),
            Call::DropSemaphore(0),
            Call::DropSemaphore(1),
            Call::DropSemaphore(2),
            Call::DropSemaphore(3),
            Call::Release,
        ]
    );
    assert_eq!(context.state(), BackendState::Destroyed);

    let end = log_len(&state);
    drop(context);
    assert_eq!(log_len(&state), end);
}

#[test]
fn test_drop_without_shutdown_releases() {
    let (context, state) = context(2, 3, 240, 240);
    drop(context);
    let log = log_since(&state, 0);
    assert_eq!(log.last(), Some(&Call::Release));
    assert!(log.contains(&Call::WaitIdle));
}
