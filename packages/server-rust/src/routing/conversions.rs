//! Conversions between bus exchanges and route exchanges.

use std::sync::Arc;

use switchyard_core::{BridgeError, Exchange, Message};

use super::exchange::RouteExchange;

/// Builds the route-side view of an inbound provider exchange.
///
/// The route exchange keeps the inbound id so log lines line up.
#[must_use]
pub fn route_exchange_from_inbound(inbound: &Exchange) -> RouteExchange {
    let mut exchange = RouteExchange::with_id(inbound.id(), inbound.mep(), bytes::Bytes::new());
    if let Some(input) = inbound.input() {
        exchange.body = input.content.clone();
        exchange.headers = input.headers.clone();
    }
    exchange.properties = inbound.properties().clone();
    exchange
}

/// Copies the caller's request into a freshly created outbound exchange.
pub fn populate_outbound(outbound: &mut Exchange, caller: &RouteExchange) {
    outbound.set_input(Message {
        content: caller.body.clone(),
        headers: caller.headers.clone(),
    });
    outbound.properties_mut().extend(
        caller
            .properties
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
}

/// Copies the answer of an outbound exchange into the caller.
///
/// An error on the answer wins over a fault, which wins over an out message.
/// A `done` answer without any of them leaves the caller untouched.
pub fn populate_answer(caller: &mut RouteExchange, answer: &Exchange) {
    if let Some(error) = answer.error() {
        caller.set_failure(Arc::clone(error));
    } else if let Some(fault) = answer.fault() {
        caller.set_fault(fault.clone());
    } else if let Some(output) = answer.output() {
        caller.set_out(output.clone());
    }
}

/// Writes the result of a route into the inbound exchange it answers.
pub fn populate_inbound_answer(inbound: &mut Exchange, result: &RouteExchange) {
    let mep = inbound.mep();
    inbound.properties_mut().extend(result.properties.clone());

    if let Some(failure) = result.failure() {
        inbound.set_error(Arc::clone(failure));
        return;
    }

    if let Some(fault) = result.fault() {
        if mep.allows_fault() {
            inbound.set_fault(fault.clone());
        } else {
            inbound.set_error(Arc::new(BridgeError::Route(format!(
                "a fault cannot answer an {mep} exchange"
            ))));
        }
        return;
    }

    match result.out() {
        Some(out) if mep.expects_out() => inbound.set_output(out.clone()),
        None if mep == switchyard_core::Mep::InOut => {
            inbound.set_error(Arc::new(BridgeError::Route(
                "no out message was produced for an in-out exchange".to_string(),
            )));
        }
        _ => inbound.set_done(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use switchyard_core::{Mep, OperationKey, Role};

    use super::*;

    fn inbound(mep: Mep) -> Exchange {
        let mut exchange = Exchange::with_id(
            "in-1",
            OperationKey::new("svc", "ep", "op"),
            mep,
            Role::Provider,
        );
        exchange.set_input(Message::new("<aaa/>").with_header("h", "v"));
        exchange
            .properties_mut()
            .insert("p".to_string(), serde_json::json!(1));
        exchange
    }

    #[test]
    fn inbound_becomes_route_exchange() {
        let route = route_exchange_from_inbound(&inbound(Mep::InOut));
        assert_eq!(route.id(), "in-1");
        assert_eq!(route.pattern(), Mep::InOut);
        assert_eq!(route.body, Bytes::from_static(b"<aaa/>"));
        assert_eq!(route.headers.get("h").map(String::as_str), Some("v"));
        assert_eq!(route.properties.get("p"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn outbound_copies_body_headers_and_properties() {
        let caller = route_exchange_from_inbound(&inbound(Mep::InOut));
        let mut outbound =
            Exchange::new(OperationKey::new("other", "ep", "op"), Mep::InOut, Role::Consumer);
        populate_outbound(&mut outbound, &caller);
        let input = outbound.input().unwrap();
        assert_eq!(input.content, Bytes::from_static(b"<aaa/>"));
        assert_eq!(input.headers.get("h").map(String::as_str), Some("v"));
        assert!(outbound.properties().contains_key("p"));
    }

    #[test]
    fn answer_error_wins_over_output() {
        let mut caller = RouteExchange::new(Mep::InOut, "x");
        let mut answer = inbound(Mep::InOut);
        answer.set_output(Message::new("out"));
        answer.set_error(Arc::new(BridgeError::Transport("boom".to_string())));
        populate_answer(&mut caller, &answer);
        assert!(caller.is_failed());
        assert!(caller.out().is_none());
    }

    #[test]
    fn answer_output_is_copied() {
        let mut caller = RouteExchange::new(Mep::InOut, "x");
        let mut answer = inbound(Mep::InOut);
        answer.set_output(Message::new("<bbb/>"));
        populate_answer(&mut caller, &answer);
        assert_eq!(caller.out().unwrap().content, Bytes::from_static(b"<bbb/>"));
    }

    #[test]
    fn in_out_result_sets_output() {
        let mut exchange = inbound(Mep::InOut);
        let mut result = route_exchange_from_inbound(&exchange);
        result.set_out(Message::new("<bbb/>"));
        populate_inbound_answer(&mut exchange, &result);
        assert!(exchange.is_active());
        assert_eq!(exchange.output().unwrap().content, Bytes::from_static(b"<bbb/>"));
    }

    #[test]
    fn in_out_without_out_is_an_error() {
        let mut exchange = inbound(Mep::InOut);
        let result = route_exchange_from_inbound(&exchange);
        populate_inbound_answer(&mut exchange, &result);
        assert!(exchange.is_error());
        assert!(matches!(
            exchange.error().map(|e| &**e),
            Some(BridgeError::Route(_))
        ));
    }

    #[test]
    fn in_only_result_is_done() {
        let mut exchange = inbound(Mep::InOnly);
        let result = route_exchange_from_inbound(&exchange);
        populate_inbound_answer(&mut exchange, &result);
        assert!(exchange.is_done());
    }

    #[test]
    fn fault_on_in_only_is_an_error() {
        let mut exchange = inbound(Mep::InOnly);
        let mut result = route_exchange_from_inbound(&exchange);
        result.set_fault(Message::new("<fault/>"));
        populate_inbound_answer(&mut exchange, &result);
        assert!(exchange.is_error());
    }

    #[test]
    fn failure_becomes_error_status() {
        let mut exchange = inbound(Mep::RobustInOnly);
        let mut result = route_exchange_from_inbound(&exchange);
        result.set_failure(BridgeError::timeout());
        populate_inbound_answer(&mut exchange, &result);
        assert!(exchange.is_error());
        assert!(Arc::ptr_eq(exchange.error().unwrap(), &BridgeError::timeout()));
    }
}
