//! 可观测性模块集成测试
//!
//! 测试 metrics、tracing 和 middleware 模块的公开接口。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use points_shared::observability::metrics::{
        record_achievement, record_dead_letter, record_event_handled, record_exchange,
        record_http_request, record_points_applied, record_reconcile_run, set_worker_last_run,
    };

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/api/passes/1", 200, 0.01);
        record_http_request("POST", "/api/exchanges", 202, 0.03);
        record_http_request("POST", "/api/passes/1/close", 409, 0.02);
        record_http_request("GET", "/api/passes/404", 404, 0.01);
    }

    #[test]
    fn test_record_ledger_metrics() {
        record_points_applied("EARN", "applied", 5);
        record_points_applied("SPEND", "duplicate", 20);
        record_points_applied("SPEND", "rejected", 20);
        record_achievement("certificate");
        record_achievement("special_access");
        record_exchange("COMPLETED");
        record_exchange("FAILED_COMPENSATED");
    }

    #[test]
    fn test_record_bus_metrics() {
        record_event_handled("POINTS_EARN_REQUESTED", "points-earn", "ok", 0.002);
        record_event_handled("STOCK_RESERVED", "exchange-saga", "retry", 0.010);
        record_dead_letter("EXCHANGE_FAILED", "stock");
    }

    #[test]
    fn test_record_worker_metrics() {
        record_reconcile_run(8, 1, 2, 0.4);
        record_reconcile_run(0, 0, 0, 0.0);
        set_worker_last_run("reconcile_worker");
        set_worker_last_run("exchange_timeout_worker");
    }
}

// ============================================================================
// 中间件测试
// ============================================================================

mod middleware_tests {
    use axum::{Router, body::Body, extract::Request, middleware, routing::get};
    use points_shared::observability::middleware::{
        REQUEST_ID_HEADER, RequestId, http_tracing, request_id,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn(http_tracing))
            .layer(middleware::from_fn(request_id))
    }

    #[test]
    fn test_request_id_as_str() {
        let id = RequestId("req-123".to_string());
        assert_eq!(id.as_str(), "req-123");
        assert!(format!("{id:?}").contains("req-123"));
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let request = Request::builder()
            .uri("/ping")
            .header(REQUEST_ID_HEADER, "upstream-id")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "upstream-id"
        );
    }

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let request = Request::builder().uri("/ping").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();
        let id = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert!(!id.is_empty());
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use points_shared::observability::ObservabilityConfig;
    use points_shared::observability::tracing::build_filter;

    #[test]
    fn test_custom_config() {
        let config = ObservabilityConfig {
            metrics_enabled: false,
            metrics_port: 9191,
            log_level: "debug".to_string(),
            json_logs: true,
            ..Default::default()
        }
        .with_service_name("points-ledger-service");

        assert_eq!(config.service_name, "points-ledger-service");
        assert!(!config.metrics_enabled);
        assert_eq!(config.metrics_port, 9191);
        assert!(config.json_logs);
    }

    #[test]
    fn test_build_filter_accepts_directives() {
        let config = ObservabilityConfig {
            log_level: "info,points_ledger=debug".to_string(),
            ..Default::default()
        };
        let _ = build_filter(&config);
    }
}

// ============================================================================
// Guard 测试
// ============================================================================

mod guard_tests {
    use points_shared::observability::ObservabilityGuard;

    #[test]
    fn test_empty_guard() {
        // 创建和销毁空 guard 都不应 panic
        for _ in 0..3 {
            drop(ObservabilityGuard::empty());
        }
    }
}
