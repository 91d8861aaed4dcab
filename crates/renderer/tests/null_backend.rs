//! Integration tests for the headless backend and the frontend on top of it.

use framepace_renderer::{
    BackendState, FrameStatus, NullBackend, RenderPacket, Renderer, RendererBackend,
    RendererError,
};
use glam::{Mat4, Vec3, Vec4};

#[test]
fn test_backend_lifecycle() {
    let mut backend = NullBackend::new(3);
    backend.initialize("null-test", 240, 240).unwrap();
    assert_eq!(backend.state(), BackendState::Initialized);

    for _ in 0..5 {
        assert_eq!(backend.begin_frame(0.016).unwrap(), FrameStatus::Proceed);
        backend
            .update_global_state(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO, Vec4::ONE, 0)
            .unwrap();
        backend.update_object(Mat4::IDENTITY).unwrap();
        backend.end_frame(0.016).unwrap();
    }
    assert_eq!(backend.state(), BackendState::Ready);

    let context = backend.context().unwrap();
    assert_eq!(context.frame_number(), 5);
    let stats = context.gpu().stats();
    assert_eq!(stats.submits, 5);
    assert_eq!(stats.presents, 5);
    assert_eq!(stats.objects_drawn, 5);

    backend.shutdown().unwrap();
    assert_eq!(backend.state(), BackendState::Destroyed);
    assert!(backend.context().unwrap().gpu().is_released());
}

#[test]
fn test_backend_initialize_twice() {
    let mut backend = NullBackend::default();
    backend.initialize("null-test", 240, 240).unwrap();
    assert!(matches!(
        backend.initialize("null-test", 240, 240),
        Err(RendererError::InvalidState { .. })
    ));
}

#[test]
fn test_backend_resize_skips_one_frame() {
    let mut backend = NullBackend::new(2);
    backend.initialize("null-test", 240, 240).unwrap();

    backend.resize(100, 100);
    backend.resize(200, 200);
    assert_eq!(backend.begin_frame(0.016).unwrap(), FrameStatus::Skip);
    assert_eq!(backend.begin_frame(0.016).unwrap(), FrameStatus::Proceed);
    backend.end_frame(0.016).unwrap();

    let context = backend.context().unwrap();
    assert_eq!(context.gpu().stats().builds, 2);
    assert_eq!(context.extent().width, 200);
    assert_eq!(context.max_frames_in_flight(), 1);
}

#[test]
fn test_renderer_draws_frames() {
    let mut renderer = Renderer::new(Box::new(NullBackend::new(3)), "null-test", 1280, 720).unwrap();

    for _ in 0..10 {
        renderer
            .draw_frame(&RenderPacket { delta_time: 0.1 })
            .unwrap();
    }
    assert!((renderer.angle() - 1.0).abs() < 1e-4);

    renderer.resize(640, 480);
    renderer
        .draw_frame(&RenderPacket { delta_time: 0.1 })
        .unwrap();
    // The resize frame was skipped
    assert!((renderer.angle() - 1.0).abs() < 1e-4);

    renderer.shutdown().unwrap();
    assert!(renderer.backend().is_none());
}
