use anyhow::{anyhow, Result};
use legendo_core::gateway::{
    record_created_payment, record_executed_payment, CreatePaymentRequest, CreatedPayment,
    ExecutePaymentRequest, ExecutedPayment, PaymentGateway,
};
use legendo_core::{CipherKey, SecureCache};
use parking_lot::Mutex;
use serde_json::json;

#[derive(Default)]
struct FakeGateway {
    calls: Mutex<Vec<String>>,
    fail_execute: bool,
}

#[async_trait::async_trait]
impl PaymentGateway for FakeGateway {
    async fn create(&self, request: &CreatePaymentRequest) -> Result<CreatedPayment> {
        self.calls.lock().push(format!("create {}", request.amount));
        Ok(CreatedPayment {
            payment_id: "PAY-1".into(),
            approval_url: "https://gateway.test/approve/PAY-1".into(),
        })
    }

    async fn execute(&self, request: &ExecutePaymentRequest) -> Result<ExecutedPayment> {
        self.calls.lock().push(format!("execute {}", request.payment_id));
        if self.fail_execute {
            return Err(anyhow!("gateway declined"));
        }
        Ok(ExecutedPayment {
            payment_id: request.payment_id.clone(),
            state: "approved".into(),
            payer: json!({"payerId": request.payer_id}),
            transactions: vec![json!({"amount": "10.00"})],
        })
    }
}

fn create_request(amount: &str) -> CreatePaymentRequest {
    CreatePaymentRequest {
        amount: amount.into(),
        currency: "USD".into(),
        description: "Legendo asset".into(),
        items: Vec::new(),
        return_url: "https://shop.test/return".into(),
        cancel_url: "https://shop.test/cancel".into(),
    }
}

#[tokio::test]
async fn created_payment_is_recorded_in_cache() {
    let gateway = FakeGateway::default();
    let cache = SecureCache::new(&CipherKey::generate());

    let recorded = record_created_payment(&gateway, &cache, &create_request("10.00"))
        .await
        .unwrap();
    assert_eq!(recorded.result.payment_id, "PAY-1");

    let back: CreatedPayment = cache.retrieve(&recorded.record_id.to_string()).unwrap();
    assert_eq!(back, recorded.result);
    assert_eq!(gateway.calls.lock().as_slice(), ["create 10.00"]);
}

#[tokio::test]
async fn invalid_request_never_reaches_gateway() {
    let gateway = FakeGateway::default();
    let cache = SecureCache::new(&CipherKey::generate());

    assert!(record_created_payment(&gateway, &cache, &create_request("0"))
        .await
        .is_err());
    assert!(gateway.calls.lock().is_empty());
    assert_eq!(cache.status().entry_count, 0);
}

#[tokio::test]
async fn executed_payment_is_recorded_in_cache() {
    let gateway = FakeGateway::default();
    let cache = SecureCache::new(&CipherKey::generate());
    let request = ExecutePaymentRequest {
        payment_id: "PAY-1".into(),
        payer_id: "PAYER-9".into(),
    };

    let recorded = record_executed_payment(&gateway, &cache, &request)
        .await
        .unwrap();
    let back: ExecutedPayment = cache.retrieve(&recorded.record_id.to_string()).unwrap();
    assert_eq!(back.state, "approved");
    assert_eq!(back.payer["payerId"], "PAYER-9");
}

#[tokio::test]
async fn gateway_failure_records_nothing() {
    let gateway = FakeGateway {
        fail_execute: true,
        ..Default::default()
    };
    let cache = SecureCache::new(&CipherKey::generate());
    let request = ExecutePaymentRequest {
        payment_id: "PAY-1".into(),
        payer_id: "PAYER-9".into(),
    };

    let err = record_executed_payment(&gateway, &cache, &request)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("declined"));
    assert_eq!(cache.status().entry_count, 0);

    let missing = ExecutePaymentRequest {
        payment_id: String::new(),
        payer_id: "PAYER-9".into(),
    };
    assert!(record_executed_payment(&gateway, &cache, &missing)
        .await
        .is_err());
    assert_eq!(gateway.calls.lock().len(), 1);
}
