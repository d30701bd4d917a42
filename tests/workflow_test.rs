use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use qaintake::application::engine::{EngineSettings, IntakeEngine};
use qaintake::application::turn::{Input, Reply, Requester};
use qaintake::domain::catalog::Money;
use qaintake::domain::order::OrderStatus;
use qaintake::domain::ports::OrderStore;
use qaintake::infrastructure::cipher::PassthroughCipher;
use qaintake::infrastructure::in_memory::{InMemoryOrderStore, InMemoryPayloadReferenceStore};
use qaintake::infrastructure::notifier::MemoryNotifier;
use qaintake::interfaces::http::{ApiSettings, ApiState, router};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower::ServiceExt;

fn settings() -> EngineSettings {
    EngineSettings {
        operator_ids: vec![99],
        ..Default::default()
    }
}

fn engine(orders: &InMemoryOrderStore, notifier: &MemoryNotifier) -> IntakeEngine {
    IntakeEngine::new(
        Box::new(orders.clone()),
        Box::new(InMemoryPayloadReferenceStore::new()),
        Box::new(notifier.clone()),
        Box::new(PassthroughCipher),
        settings(),
    )
}

async fn say(engine: &IntakeEngine, user: &Requester, input: Input) -> Vec<Reply> {
    engine.handle(user, input).await.unwrap().replies
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_web_draft_is_finished_in_chat() {
    let orders = InMemoryOrderStore::new();
    let notifier = MemoryNotifier::new();
    let engine = engine(&orders, &notifier);
    let app = router(ApiState {
        orders: Arc::new(orders.clone()),
        references: Arc::new(InMemoryPayloadReferenceStore::new()),
        cipher: Arc::new(PassthroughCipher),
        settings: Arc::new(ApiSettings {
            intake: settings(),
            ..Default::default()
        }),
    });

    let request = Request::builder()
        .method("POST")
        .uri("/api/drafts")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "email": "buyer@example.com",
                "geo": "IN",
                "paymentMethod": "UPI",
                "tests": 3,
                "payout": "W"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let link = body["order"]["resumeLink"].as_str().unwrap().to_string();

    let user = Requester::new(5, Some("alice".into()));
    let replies = say(&engine, &user, Input::Start(Some(link))).await;
    assert!(matches!(replies[0], Reply::Resumed { order_id: 1 }));

    say(&engine, &user, Input::Skip).await;
    say(&engine, &user, Input::Skip).await;
    let replies = say(&engine, &user, Input::Confirm).await;
    assert!(matches!(replies[0], Reply::Submitted(_)));

    let request = Request::builder()
        .uri("/api/orders/1")
        .body(Body::empty())
        .unwrap();
    let body = json_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["status"], "awaiting_payment");
    assert_eq!(body["chatUserId"], 5);
    assert_eq!(body["email"], "buyer@example.com");
    assert_eq!(body["priceEur"], "265");

    assert_eq!(notifier.drain().await.len(), 1);
}

#[tokio::test]
async fn test_requesters_are_served_in_parallel() {
    let orders = InMemoryOrderStore::new();
    let notifier = MemoryNotifier::new();
    let engine = Arc::new(engine(&orders, &notifier));

    let handles: Vec<_> = (1..=10i64)
        .map(|user_id| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let user = Requester::new(user_id, None);
                let script = [
                    Input::Start(None),
                    Input::Text("IN".into()),
                    Input::Text("UPI".into()),
                    Input::Text("3".into()),
                    Input::Text("withdraw".into()),
                    Input::Skip,
                    Input::Skip,
                ];
                for input in script {
                    say(&engine, &user, input).await;
                }
                let replies = say(&engine, &user, Input::Confirm).await;
                match &replies[0] {
                    Reply::Submitted(summary) => summary.id,
                    other => panic!("unexpected reply {:?}", other),
                }
            })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids, (1..=10).collect());

    let counts = orders.status_counts().await.unwrap();
    assert_eq!(counts.get(&OrderStatus::AwaitingPayment), Some(&10));
    for id in ids {
        assert_eq!(orders.get(id).await.unwrap().price, Some(Money::from_eur(265)));
    }
    assert_eq!(notifier.drain().await.len(), 10);
}

#[tokio::test]
async fn test_cancel_after_submit_keeps_the_order() {
    let orders = InMemoryOrderStore::new();
    let notifier = MemoryNotifier::new();
    let engine = engine(&orders, &notifier);
    let user = Requester::new(8, None);

    for input in [
        Input::Start(None),
        Input::Text("BD".into()),
        Input::Text("bKash".into()),
        Input::Text("1".into()),
        Input::Text("none".into()),
        Input::Skip,
        Input::Skip,
        Input::Confirm,
    ] {
        say(&engine, &user, input).await;
    }

    let replies = say(&engine, &user, Input::Cancel).await;
    assert!(matches!(replies[0], Reply::AlreadySubmitted(_)));
    assert_eq!(orders.get(1).await.unwrap().status, OrderStatus::AwaitingPayment);

    let replies = say(&engine, &user, Input::Status).await;
    let Reply::Status(Some(summary)) = &replies[0] else {
        panic!("expected a status reply, got {:?}", replies);
    };
    assert_eq!(summary.total, Some(Money::from_eur(85)));
}
