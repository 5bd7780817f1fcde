//! Integration tests for the order data model as seen by saga callers.

use domain::{DomainError, Item, Items, OrderError, OrderInput, OrderOutput};

mod order_input {
    use super::*;

    #[test]
    fn example_order_parses_and_validates() {
        let json = serde_json::json!({
            "orderId": "A1",
            "address": "1 Main St",
            "items": [
                {"id": 654300, "description": "Table Top", "quantity": 1},
                {"id": 654321, "description": "Table Legs", "quantity": 2},
                {"id": 654322, "description": "Keypad", "quantity": 1}
            ]
        });

        let input: OrderInput = serde_json::from_value(json).unwrap();
        input.validate().unwrap();

        assert_eq!(input.line_items, Items::catalog());
    }

    #[test]
    fn serialized_input_uses_line_items_key() {
        let input = OrderInput::new("A1", "1 Main St").with_items(vec![Item::new(1, "A", 1)]);
        let json = serde_json::to_value(&input).unwrap();

        assert_eq!(json["orderId"], "A1");
        assert_eq!(json["lineItems"][0]["id"], 1);

        let back: OrderInput = serde_json::from_value(json).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn validation_errors_convert_to_domain_errors() {
        let err: DomainError = OrderInput::new("", "1 Main St")
            .validate()
            .unwrap_err()
            .into();

        assert!(matches!(err, DomainError::Order(OrderError::OrderIdRequired)));
        assert_eq!(err.to_string(), "Order error: Order ID is required");
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err: DomainError = serde_json::from_str::<OrderInput>("{\"orderId\": 5}")
            .unwrap_err()
            .into();

        assert!(matches!(err, DomainError::Serialization(_)));
    }
}

mod order_output {
    use super::*;

    #[test]
    fn output_round_trips_through_json() {
        let output = OrderOutput::new("6c1f4e0a-1b51-4f9e-9a51-0d8c4b0f7a11", "1 Main St");
        let text = serde_json::to_string(&output).unwrap();

        assert!(text.contains("\"trackingId\""));
        assert_eq!(serde_json::from_str::<OrderOutput>(&text).unwrap(), output);
    }
}
