use std::sync::Arc;

use uuid::Uuid;

use crate::{
    domain::Order,
    error::{AppError, Result},
    gateways::WebhookEvent,
    repository::OrderRepository,
};

/// Finds the one order a webhook is talking about. Gateways truncate our
/// 36-character ids to 16 on outbound references, so anything shorter than
/// canonical length is treated as a prefix. A prefix matching more than
/// one order is a hard error, never a guess: picking the wrong one would
/// silently corrupt an unrelated order.
pub struct OrderResolver {
    orders: Arc<dyn OrderRepository>,
}

impl OrderResolver {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    pub async fn resolve(
        &self,
        event: &WebhookEvent,
        query_reference: Option<&str>,
    ) -> Result<Order> {
        let reference = event
            .order_reference
            .as_deref()
            .or(query_reference)
            .map(str::trim)
            .filter(|r| !r.is_empty());

        if let Some(reference) = reference {
            return self.resolve_reference(reference).await;
        }

        // No reference anywhere: the transaction id can still identify the
        // order, since (gateway, transaction_id) is unique.
        if let (Some(gateway), Some(transaction_id)) =
            (event.gateway, event.transaction_id.as_deref())
        {
            if let Some(order) = self
                .orders
                .find_by_gateway_transaction_id(gateway, transaction_id)
                .await?
            {
                return Ok(order);
            }
            return Err(AppError::OrderNotFound(format!(
                "no order for {} transaction {}",
                gateway, transaction_id
            )));
        }

        Err(AppError::Validation(
            "webhook carries no order reference".to_string(),
        ))
    }

    pub async fn resolve_reference(&self, reference: &str) -> Result<Order> {
        if reference.len() == 36 {
            let id = Uuid::parse_str(reference).map_err(|_| {
                AppError::Validation(format!("malformed order id: {}", reference))
            })?;
            return self
                .orders
                .find_by_id(id)
                .await?
                .ok_or_else(|| AppError::OrderNotFound(format!("order {} not found", id)));
        }

        if reference.len() > 36 {
            return Err(AppError::Validation(format!(
                "order reference too long: {}",
                reference
            )));
        }

        let matches = self.orders.find_by_id_prefix(reference).await?;
        let mut matches = matches.into_iter();
        match (matches.next(), matches.next()) {
            (Some(order), None) => Ok(order),
            (None, _) => Err(AppError::OrderNotFound(format!(
                "no order matches reference {}",
                reference
            ))),
            (Some(_), Some(_)) => Err(AppError::AmbiguousOrder(format!(
                "reference {} matches more than one order",
                reference
            ))),
        }
    }
}
