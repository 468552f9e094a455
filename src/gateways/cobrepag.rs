//! CobrePag, the domestic acquirer. Form-encoded requests under Basic auth,
//! JSON responses wrapped in a `transacao` envelope carrying a numeric
//! status code plus a free-text message. Webhooks arrive in whatever shape
//! the merchant panel was configured with years ago: JSON, form-encoded, or
//! raw `key=value` text, with the order reference in one of four places.
//!
//! CobrePag does not sign its webhooks. Events are therefore treated as
//! untrusted hints: the status they carry still has to pass the monotonic
//! transition rules before anything is persisted.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;

use crate::{
    config::GatewayCredentials,
    domain::{GatewayKind, PaymentMethod},
    error::{AppError, Result},
    gateways::{
        truncated_reference, value_as_i64, value_as_string, CardChargeRequest, ChargeOutcome,
        ChargeStatus, ConnectionCheck, GatewayAdapter, PixCharge, PixChargeRequest, StatusProbe,
        WebhookEvent,
    },
};

pub struct CobrePagGateway {
    http: reqwest::Client,
}

impl CobrePagGateway {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn auth<'a>(credentials: &'a GatewayCredentials) -> Result<(&'a str, &'a str)> {
        let id = credentials
            .merchant_id
            .as_deref()
            .ok_or_else(|| AppError::Config("cobrepag: merchant_id not configured".into()))?;
        let key = credentials
            .merchant_key
            .as_deref()
            .ok_or_else(|| AppError::Config("cobrepag: merchant_key not configured".into()))?;
        Ok((id, key))
    }

    /// CobrePag wants decimal reais with two places, as a string.
    fn format_reais(amount_cents: i64) -> String {
        format!("{}.{:02}", amount_cents / 100, amount_cents % 100)
    }

    async fn post_form(
        &self,
        credentials: &GatewayCredentials,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<Value> {
        let (id, key) = Self::auth(credentials)?;
        let url = format!("{}{}", credentials.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .basic_auth(id, Some(key))
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("cobrepag: {}", e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("cobrepag: invalid response body: {}", e)))?;

        if !status.is_success() {
            let detail = body
                .pointer("/erro/mensagem")
                .and_then(Value::as_str)
                .unwrap_or("request rejected");
            return Err(AppError::Gateway(format!(
                "cobrepag: HTTP {}: {}",
                status, detail
            )));
        }
        Ok(body)
    }

    fn transaction_fields(body: &Value) -> (Option<String>, Option<i64>, Option<String>) {
        let tx = body.get("transacao").unwrap_or(body);
        let tid = tx.get("tid").and_then(value_as_string);
        let code = tx.pointer("/status/codigo").and_then(value_as_i64);
        let message = tx
            .pointer("/status/mensagem")
            .and_then(Value::as_str)
            .map(String::from);
        (tid, code, message)
    }
}

#[async_trait]
impl GatewayAdapter for CobrePagGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Cobrepag
    }

    fn supported_methods(&self) -> &'static [PaymentMethod] {
        &[PaymentMethod::CreditCard, PaymentMethod::Pix, PaymentMethod::Boleto]
    }

    fn required_credentials(&self) -> &'static [&'static str] {
        &["base_url", "merchant_id", "merchant_key"]
    }

    async fn process_card_payment(
        &self,
        request: &CardChargeRequest,
        credentials: &GatewayCredentials,
    ) -> Result<ChargeOutcome> {
        let card = &request.card;
        let number = card
            .number
            .as_deref()
            .ok_or_else(|| AppError::Validation("cobrepag: card number is required".into()))?;

        let mut form: Vec<(&str, String)> = vec![
            ("metodo", "cartao".into()),
            ("valor", Self::format_reais(request.amount_cents)),
            ("pedido", truncated_reference(&request.order_id)),
            ("parcelas", request.installments.max(1).to_string()),
            ("cartao_numero", number.to_string()),
            ("cliente_nome", request.customer.name.clone()),
            ("cliente_email", request.customer.email.clone()),
        ];
        if let Some(holder) = &card.holder {
            form.push(("cartao_titular", holder.clone()));
        }
        if let Some(expiry) = &card.expiry {
            form.push(("cartao_validade", expiry.clone()));
        }
        if let Some(cvv) = &card.cvv {
            form.push(("cartao_cvv", cvv.clone()));
        }
        if let Some(document) = &request.customer.document {
            form.push(("cliente_documento", document.clone()));
        }

        let body = self.post_form(credentials, "/v1/transacoes", &form).await?;
        let (tid, code, message) = Self::transaction_fields(&body);

        let status = match code {
            Some(5) | Some(8) => ChargeStatus::Approved,
            Some(3) | Some(7) => ChargeStatus::Rejected,
            _ => ChargeStatus::Pending,
        };

        Ok(ChargeOutcome {
            status,
            transaction_id: tid,
            message,
            raw_response: body,
        })
    }

    async fn generate_pix(
        &self,
        request: &PixChargeRequest,
        credentials: &GatewayCredentials,
    ) -> Result<PixCharge> {
        let mut form: Vec<(&str, String)> = vec![
            ("valor", Self::format_reais(request.amount_cents)),
            ("pedido", truncated_reference(&request.order_id)),
            ("cliente_nome", request.customer.name.clone()),
            ("cliente_email", request.customer.email.clone()),
        ];
        if let Some(document) = &request.customer.document {
            form.push(("cliente_documento", document.clone()));
        }

        let body = self.post_form(credentials, "/v1/pix", &form).await?;
        let tx = body.get("transacao").unwrap_or(&body);

        let qr_text = tx
            .pointer("/qrcode/texto")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Gateway("cobrepag: pix response missing qrcode".into()))?
            .to_string();
        let qr_image = tx
            .pointer("/qrcode/imagem")
            .and_then(Value::as_str)
            .map(String::from);
        let tid = tx.get("tid").and_then(value_as_string);

        Ok(PixCharge {
            qr_code_image: qr_image,
            qr_code_text: qr_text,
            transaction_id: tid,
            raw_response: body,
        })
    }

    async fn verify_payment_status(
        &self,
        transaction_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<StatusProbe> {
        let (id, key) = Self::auth(credentials)?;
        let url = format!(
            "{}/v1/transacoes/{}",
            credentials.base_url.trim_end_matches('/'),
            transaction_id
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(id, Some(key))
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("cobrepag: {}", e)))?;

        // The gateway answers 404 for transactions it has not registered
        // yet. That is a pending order, not a failure.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(StatusProbe::default());
        }
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Gateway(format!("cobrepag: HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("cobrepag: invalid response body: {}", e)))?;
        let (_, code, message) = Self::transaction_fields(&body);

        Ok(StatusProbe {
            gateway_status: message,
            status_code: code,
            raw_response: body,
        })
    }

    fn parse_webhook(
        &self,
        _body: &[u8],
        decoded: &Value,
        _headers: &HeaderMap,
        _credentials: &GatewayCredentials,
    ) -> Result<Option<WebhookEvent>> {
        if !decoded.is_object() {
            return Ok(None);
        }

        let order_reference = decoded
            .get("order_id")
            .and_then(value_as_string)
            .or_else(|| decoded.pointer("/attributes/order_id").and_then(value_as_string))
            .or_else(|| decoded.get("pedido").and_then(value_as_string))
            .or_else(|| {
                decoded
                    .pointer("/retorno/0/num_pedido")
                    .and_then(value_as_string)
            });

        let transaction_id = decoded
            .get("tid")
            .and_then(value_as_string)
            .or_else(|| decoded.pointer("/attributes/tid").and_then(value_as_string))
            .or_else(|| decoded.pointer("/retorno/0/tid").and_then(value_as_string));

        let status_node = decoded
            .pointer("/attributes/status")
            .or_else(|| decoded.get("status"))
            .or_else(|| decoded.pointer("/retorno/0/status"));

        let (status_code, status_message) = match status_node {
            Some(node @ Value::Object(_)) => {
                let code = node
                    .get("code")
                    .or_else(|| node.get("codigo"))
                    .and_then(value_as_i64);
                let message = node
                    .get("message")
                    .or_else(|| node.get("mensagem"))
                    .and_then(Value::as_str)
                    .map(String::from);
                (code, message)
            }
            Some(Value::String(s)) if !s.is_empty() => (None, Some(s.clone())),
            _ => {
                // Flat form-encoded payloads spell the fields out.
                let code = decoded.get("status_codigo").and_then(value_as_i64);
                let message = decoded
                    .get("status_mensagem")
                    .and_then(Value::as_str)
                    .map(String::from);
                (code, message)
            }
        };

        if order_reference.is_none()
            && transaction_id.is_none()
            && status_code.is_none()
            && status_message.is_none()
        {
            return Ok(None);
        }

        Ok(Some(WebhookEvent {
            gateway: Some(GatewayKind::Cobrepag),
            source: "cobrepag".to_string(),
            transaction_id,
            order_reference,
            status_code,
            status_message,
            raw: decoded.clone(),
        }))
    }

    async fn test_connection(&self, credentials: &GatewayCredentials) -> Result<ConnectionCheck> {
        let (id, key) = Self::auth(credentials)?;
        let url = format!("{}/v1/ping", credentials.base_url.trim_end_matches('/'));
        match self.http.get(&url).basic_auth(id, Some(key)).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::UNAUTHORIZED => {
                Ok(ConnectionCheck {
                    ok: false,
                    message: "credentials rejected".to_string(),
                })
            }
            Ok(response) => Ok(ConnectionCheck {
                ok: true,
                message: format!("reachable (HTTP {})", response.status()),
            }),
            Err(e) => Ok(ConnectionCheck {
                ok: false,
                message: format!("unreachable: {}", e),
            }),
        }
    }
}
