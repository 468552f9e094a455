//! Folds every gateway's status vocabulary onto [`OrderStatus`].
//!
//! Gateways emit free text in mixed case and language plus numeric codes, so
//! matching is keyword/code-set membership rather than string equality. The
//! keyword lists are stems: "aprovad" covers "Aprovada", "aprovado",
//! "APROVADO", and so on.

use crate::domain::{GatewayKind, OrderStatus};

const PAID_CODES: &[i64] = &[5, 8];
const CANCELED_CODES: &[i64] = &[3, 7];
const REFUNDED_CODES: &[i64] = &[6];

const PAID_KEYWORDS: &[&str] = &[
    "approved", "captured", "succeeded", "pago", "sucesso", "aprovad", "captur",
];
const CANCELED_KEYWORDS: &[&str] = &["cancel", "denied", "refused", "recusado", "falha"];
const REFUNDED_KEYWORDS: &[&str] = &["refund", "estornado"];

/// Maps a raw gateway status onto the internal lifecycle. When code and
/// message disagree, the code wins: codes are machine-assigned, messages are
/// free text. Anything unrecognized is `Pending`, which covers initiated,
/// billet-issued, in-analysis, and every other limbo state.
///
/// All current sources share one vocabulary table; `gateway` is the hook for
/// a per-gateway override if a future processor reuses a code with a
/// different meaning.
pub fn normalize(
    gateway: Option<GatewayKind>,
    code: Option<i64>,
    message: Option<&str>,
) -> OrderStatus {
    let _ = gateway;

    if let Some(code) = code {
        if let Some(status) = from_code(code) {
            return status;
        }
    }

    if let Some(message) = message {
        if let Some(status) = from_message(message) {
            return status;
        }
    }

    OrderStatus::Pending
}

fn from_code(code: i64) -> Option<OrderStatus> {
    if PAID_CODES.contains(&code) {
        Some(OrderStatus::Paid)
    } else if CANCELED_CODES.contains(&code) {
        Some(OrderStatus::Canceled)
    } else if REFUNDED_CODES.contains(&code) {
        Some(OrderStatus::Refunded)
    } else {
        None
    }
}

fn from_message(message: &str) -> Option<OrderStatus> {
    let message = message.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| message.contains(k));

    if matches(PAID_KEYWORDS) {
        Some(OrderStatus::Paid)
    } else if matches(CANCELED_KEYWORDS) {
        Some(OrderStatus::Canceled)
    } else if matches(REFUNDED_KEYWORDS) {
        Some(OrderStatus::Refunded)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(code: Option<i64>, message: Option<&str>) -> OrderStatus {
        normalize(Some(GatewayKind::Cobrepag), code, message)
    }

    #[test]
    fn paid_vocabulary() {
        for message in [
            "approved",
            "Captured",
            "succeeded",
            "PAGO",
            "Sucesso",
            "Aprovada",
            "aprovado",
            "Capturado",
            "Transação capturada com sucesso",
        ] {
            assert_eq!(norm(None, Some(message)), OrderStatus::Paid, "{}", message);
        }
        assert_eq!(norm(Some(5), None), OrderStatus::Paid);
        assert_eq!(norm(Some(8), None), OrderStatus::Paid);
    }

    #[test]
    fn canceled_vocabulary() {
        for message in [
            "canceled",
            "cancelled",
            "Denied",
            "refused",
            "Recusado",
            "Cancelado",
            "falha na autorizacao",
        ] {
            assert_eq!(
                norm(None, Some(message)),
                OrderStatus::Canceled,
                "{}",
                message
            );
        }
        assert_eq!(norm(Some(3), None), OrderStatus::Canceled);
        assert_eq!(norm(Some(7), None), OrderStatus::Canceled);
    }

    #[test]
    fn refunded_vocabulary() {
        assert_eq!(norm(None, Some("refunded")), OrderStatus::Refunded);
        assert_eq!(norm(None, Some("Estornado")), OrderStatus::Refunded);
        assert_eq!(norm(Some(6), None), OrderStatus::Refunded);
    }

    #[test]
    fn unknown_states_are_pending() {
        for message in ["in_process", "waiting_payment", "em análise", "boleto emitido", ""] {
            assert_eq!(
                norm(None, Some(message)),
                OrderStatus::Pending,
                "{}",
                message
            );
        }
        assert_eq!(norm(None, None), OrderStatus::Pending);
        assert_eq!(norm(Some(99), None), OrderStatus::Pending);
    }

    #[test]
    fn code_wins_over_conflicting_message() {
        assert_eq!(norm(Some(8), Some("recusado")), OrderStatus::Paid);
        assert_eq!(norm(Some(3), Some("aprovado")), OrderStatus::Canceled);
        assert_eq!(norm(Some(6), Some("pago")), OrderStatus::Refunded);
    }

    #[test]
    fn unknown_code_falls_back_to_message() {
        assert_eq!(norm(Some(42), Some("aprovado")), OrderStatus::Paid);
    }

    #[test]
    fn mercadopago_and_stripe_vocabularies() {
        assert_eq!(
            normalize(Some(GatewayKind::Mercadopago), None, Some("approved")),
            OrderStatus::Paid
        );
        assert_eq!(
            normalize(Some(GatewayKind::Mercadopago), None, Some("in_process")),
            OrderStatus::Pending
        );
        assert_eq!(
            normalize(Some(GatewayKind::Stripe), None, Some("succeeded")),
            OrderStatus::Paid
        );
        assert_eq!(
            normalize(Some(GatewayKind::Stripe), None, Some("canceled")),
            OrderStatus::Canceled
        );
        assert_eq!(
            normalize(Some(GatewayKind::Stripe), None, Some("requires_payment_method")),
            OrderStatus::Pending
        );
    }
}
