//! Applies payment provider events to orders, users and carts.
//!
//! Orders move `pending -> paid` or `pending -> cancelled` exactly once. All
//! transitions go through a conditional update on `status = 'pending'`, so
//! out-of-order events never move a terminal order. Provider event ids are
//! recorded before an event is applied, so a redelivered event changes
//! nothing at all.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    repositories::{
        OrderRepository, Transition, UserCriteria, UserRepository, WebhookEventRepository,
    },
    services::commerce::CartService,
    webhooks::PaymentEvent,
};

/// What reconciling one event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReconcileOutcome {
    /// Known event that needs no local change
    Acknowledged,
    /// Event that could not be matched to local state, or an unknown kind
    Ignored,
    CustomerLinked,
    OrderPaid,
    OrderCancelled,
    /// The order was already paid or cancelled; nothing changed
    AlreadyTerminal,
    /// Invoice paid with no outstanding checkout; only the cart was emptied
    CartCleared,
    /// This provider event id was applied before
    Duplicate,
}

#[derive(Clone)]
pub struct WebhookReconciler {
    users: UserRepository,
    orders: OrderRepository,
    carts: CartService,
    events: WebhookEventRepository,
}

impl WebhookReconciler {
    pub fn new(
        users: UserRepository,
        orders: OrderRepository,
        carts: CartService,
        events: WebhookEventRepository,
    ) -> Self {
        Self {
            users,
            orders,
            carts,
            events,
        }
    }

    /// Applies a delivery at most once per provider event id. Deliveries
    /// without an id are applied every time. A failed event gives up its id
    /// so a later redelivery is applied again.
    #[instrument(skip(self, event), fields(event = %event))]
    pub async fn handle(
        &self,
        event_id: Option<&str>,
        event: PaymentEvent,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let Some(event_id) = event_id else {
            return self.reconcile(event).await;
        };

        if !self.events.claim(event_id, event.kind()).await? {
            return Ok(ReconcileOutcome::Duplicate);
        }

        match self.reconcile(event).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(release_err) = self.events.release(event_id).await {
                    warn!(event_id, error = %release_err, "could not release failed webhook event");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(event = %event))]
    pub async fn reconcile(&self, event: PaymentEvent) -> Result<ReconcileOutcome, ServiceError> {
        match event {
            PaymentEvent::CheckoutSessionCompleted { session_id }
            | PaymentEvent::CheckoutSessionPaymentSucceeded { session_id } => {
                debug!(%session_id, "checkout confirmation acknowledged, awaiting invoice");
                Ok(ReconcileOutcome::Acknowledged)
            }
            PaymentEvent::CheckoutSessionAsyncPaymentFailed { session_id } => {
                if let Some(user) = self
                    .users
                    .find_by(&UserCriteria::SessionId(session_id.clone()))
                    .await?
                {
                    self.users.set_outstanding_session(user.id, None).await?;
                }
                self.cancel(&session_id).await
            }
            PaymentEvent::CustomerCreated { customer_id, email } => {
                self.link_customer(&customer_id, email.as_deref()).await
            }
            PaymentEvent::InvoicePaid { customer_id } => self.invoice_paid(&customer_id).await,
            PaymentEvent::PaymentIntentPaymentFailed { session_id } => {
                let outcome = self.cancel(&session_id).await?;
                self.users.clear_outstanding_session(&session_id).await?;
                Ok(outcome)
            }
            PaymentEvent::Unknown(kind) => {
                info!(%kind, "ignoring unhandled webhook event");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn link_customer(
        &self,
        customer_id: &str,
        email: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let Some(email) = email.filter(|e| !e.is_empty()) else {
            warn!(customer_id, "customer created without email");
            return Ok(ReconcileOutcome::Ignored);
        };

        let Some(user) = self
            .users
            .find_by(&UserCriteria::Email(email.to_string()))
            .await?
        else {
            warn!(customer_id, "no user matches new customer email");
            return Ok(ReconcileOutcome::Ignored);
        };

        let user = self.users.set_billing_customer_id(user, customer_id).await?;
        info!(user_id = %user.id, customer_id, "linked billing customer");
        Ok(ReconcileOutcome::CustomerLinked)
    }

    async fn invoice_paid(&self, customer_id: &str) -> Result<ReconcileOutcome, ServiceError> {
        let Some(user) = self
            .users
            .find_by(&UserCriteria::BillingCustomerId(customer_id.to_string()))
            .await?
        else {
            warn!(customer_id, "invoice paid for unknown customer");
            return Ok(ReconcileOutcome::Ignored);
        };

        match self.carts.validate(user.id).await {
            Ok(_) | Err(ServiceError::CartNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let Some(session_id) = user.outstanding_session_id else {
            debug!(user_id = %user.id, "invoice paid without outstanding checkout");
            return Ok(ReconcileOutcome::CartCleared);
        };

        let outcome = match self
            .orders
            .transition_pending(&session_id, OrderStatus::Paid)
            .await?
        {
            Transition::Applied(order) => {
                info!(user_id = %user.id, order_id = %order.id, %session_id, "order paid");
                ReconcileOutcome::OrderPaid
            }
            Transition::AlreadyTerminal(order) => {
                warn!(order_id = %order.id, status = %order.status, %session_id, "invoice paid for settled order");
                ReconcileOutcome::AlreadyTerminal
            }
        };

        self.users.clear_outstanding_session(&session_id).await?;
        Ok(outcome)
    }

    async fn cancel(&self, session_id: &str) -> Result<ReconcileOutcome, ServiceError> {
        match self
            .orders
            .transition_pending(session_id, OrderStatus::Cancelled)
            .await?
        {
            Transition::Applied(order) => {
                self.carts.release_checkout(order.user_id, session_id).await?;
                Ok(ReconcileOutcome::OrderCancelled)
            }
            Transition::AlreadyTerminal(_) => Ok(ReconcileOutcome::AlreadyTerminal),
        }
    }
}
