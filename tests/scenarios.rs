//! End-to-end scenario tests against an in-memory engine, covering the
//! multi-step customer lifecycles the unit tests inside each module don't
//! reach on their own.

use steelsync_core::{
    CashFlowDirection, Engine, EngineConfig, ForceDeleteMode, InvoiceStatus, Money, NewInvoiceItem, Quantity,
    ReturnLine, SettlementType, UnitType,
};

async fn seeded_engine() -> (Engine, i64, i64) {
    let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
    let customer_id = engine.create_customer("Acme Traders", "2026-01-01").await.unwrap();
    let product_id = engine
        .create_product("Steel Rod 12mm", UnitType::Kg, Money::parse("250.00").unwrap(), true)
        .await
        .unwrap();
    engine
        .receive_vendor_stock(1, product_id, Quantity::parse("500", UnitType::Kg).unwrap(), "2026-01-01", "08:00:00")
        .await
        .unwrap();
    (engine, customer_id, product_id)
}

#[tokio::test]
async fn scenario_sale_then_partial_payment_then_full_payment() {
    let (engine, customer_id, product_id) = seeded_engine().await;

    let invoice_id = engine
        .create_invoice(
            customer_id,
            vec![NewInvoiceItem {
                product_id: Some(product_id),
                description: None,
                unit: UnitType::Kg,
                quantity: Quantity::parse("100", UnitType::Kg).unwrap(),
                unit_price: Money::parse("250.00").unwrap(),
                is_misc_item: false,
                is_non_stock_item: false,
                t_iron: None,
            }],
            "2026-02-01",
            "10:00:00",
        )
        .await
        .unwrap();

    let invoice = engine.get_invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.grand_total, Money::parse("25000.00").unwrap());
    assert_eq!(invoice.status, InvoiceStatus::Pending);

    engine
        .record_payment(customer_id, Some(invoice_id), Money::parse("10000.00").unwrap(), "cash", None, "2026-02-05", "11:00:00")
        .await
        .unwrap();
    let invoice = engine.get_invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(invoice.remaining_balance, Money::parse("15000.00").unwrap());

    engine
        .record_payment(customer_id, Some(invoice_id), Money::parse("15000.00").unwrap(), "bank", None, "2026-02-10", "11:00:00")
        .await
        .unwrap();
    let invoice = engine.get_invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);

    let balance = engine.get_customer_balance(customer_id).await.unwrap();
    assert_eq!(balance, Money::ZERO);
}

#[tokio::test]
async fn scenario_fifo_payment_spreads_across_open_invoices() {
    let (engine, customer_id, _product_id) = seeded_engine().await;

    let first = engine
        .create_invoice(
            customer_id,
            vec![NewInvoiceItem {
                product_id: None,
                description: Some("Service fee".to_string()),
                unit: UnitType::Piece,
                quantity: Quantity(1),
                unit_price: Money::parse("4000.00").unwrap(),
                is_misc_item: true,
                is_non_stock_item: true,
                t_iron: None,
            }],
            "2026-02-01",
            "09:00:00",
        )
        .await
        .unwrap();

    let second = engine
        .create_invoice(
            customer_id,
            vec![NewInvoiceItem {
                product_id: None,
                description: Some("Service fee".to_string()),
                unit: UnitType::Piece,
                quantity: Quantity(1),
                unit_price: Money::parse("6000.00").unwrap(),
                is_misc_item: true,
                is_non_stock_item: true,
                t_iron: None,
            }],
            "2026-02-03",
            "09:00:00",
        )
        .await
        .unwrap();

    engine
        .record_payment(customer_id, None, Money::parse("5000.00").unwrap(), "cash", None, "2026-02-10", "09:00:00")
        .await
        .unwrap();

    let first_invoice = engine.get_invoice(first).await.unwrap();
    let second_invoice = engine.get_invoice(second).await.unwrap();
    assert_eq!(first_invoice.status, InvoiceStatus::Paid);
    assert_eq!(second_invoice.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(second_invoice.remaining_balance, Money::parse("5000.00").unwrap());
}

#[tokio::test]
async fn scenario_vendor_stock_receiving_increases_product_stock() {
    let (engine, _customer_id, product_id) = seeded_engine().await;
    let before = engine.get_product(product_id).await.unwrap().current_stock;
    engine
        .receive_vendor_stock(1, product_id, Quantity::parse("50", UnitType::Kg).unwrap(), "2026-02-15", "08:00:00")
        .await
        .unwrap();
    let after = engine.get_product(product_id).await.unwrap().current_stock;
    assert_eq!(after, before.checked_add(Quantity::parse("50", UnitType::Kg).unwrap()).unwrap());
}

#[tokio::test]
async fn scenario_return_on_pending_invoice_restores_stock_and_credits_ledger() {
    let (engine, customer_id, product_id) = seeded_engine().await;

    let invoice_id = engine
        .create_invoice(
            customer_id,
            vec![NewInvoiceItem {
                product_id: Some(product_id),
                description: None,
                unit: UnitType::Kg,
                quantity: Quantity::parse("20", UnitType::Kg).unwrap(),
                unit_price: Money::parse("250.00").unwrap(),
                is_misc_item: false,
                is_non_stock_item: false,
                t_iron: None,
            }],
            "2026-02-20",
            "10:00:00",
        )
        .await
        .unwrap();

    let stock_after_sale = engine.get_product(product_id).await.unwrap().current_stock;

    let item_id = {
        let items = engine.invoice_items(invoice_id).await.unwrap();
        items[0].id
    };

    engine
        .process_return(
            invoice_id,
            vec![ReturnLine {
                invoice_item_id: item_id,
                product_id: Some(product_id),
                unit: UnitType::Kg,
                quantity: Quantity::parse("5", UnitType::Kg).unwrap(),
                unit_price: Money::parse("250.00").unwrap(),
            }],
            SettlementType::Ledger,
            "cash",
            None,
            "2026-02-21",
            "10:00:00",
        )
        .await
        .unwrap();

    let balance = engine.get_customer_balance(customer_id).await.unwrap();
    assert_eq!(balance, Money::parse("3750.00").unwrap());

    let invoice_after_return = engine.get_invoice(invoice_id).await.unwrap();
    assert_eq!(invoice_after_return.grand_total, Money::parse("3750.00").unwrap());
    assert_eq!(invoice_after_return.status, InvoiceStatus::Pending);

    let stock_after_return = engine.get_product(product_id).await.unwrap().current_stock;
    assert_eq!(
        stock_after_return,
        stock_after_sale.checked_add(Quantity::parse("5", UnitType::Kg).unwrap()).unwrap()
    );
}

#[tokio::test]
async fn scenario_deleted_customer_history_reparents_to_guest() {
    let (engine, customer_id, _product_id) = seeded_engine().await;
    engine
        .create_invoice(
            customer_id,
            vec![NewInvoiceItem {
                product_id: None,
                description: Some("Misc".to_string()),
                unit: UnitType::Piece,
                quantity: Quantity(1),
                unit_price: Money::parse("500.00").unwrap(),
                is_misc_item: true,
                is_non_stock_item: true,
                t_iron: None,
            }],
            "2026-02-01",
            "09:00:00",
        )
        .await
        .unwrap();

    engine.delete_customer(customer_id, "Acme Traders").await.unwrap();

    let customer = engine.get_customer(customer_id).await.unwrap();
    assert_eq!(customer.name, "[DELETED] Acme Traders");
    assert!(customer.is_deleted);
}

#[tokio::test]
async fn scenario_editing_unpaid_invoice_items_then_deleting_unwinds_the_ledger() {
    let (engine, customer_id, _product_id) = seeded_engine().await;

    let invoice_id = engine
        .create_invoice(
            customer_id,
            vec![NewInvoiceItem {
                product_id: None,
                description: Some("Labour".to_string()),
                unit: UnitType::Piece,
                quantity: Quantity(1),
                unit_price: Money::parse("1000.00").unwrap(),
                is_misc_item: true,
                is_non_stock_item: true,
                t_iron: None,
            }],
            "2026-03-01",
            "09:00:00",
        )
        .await
        .unwrap();
    assert_eq!(engine.get_customer_balance(customer_id).await.unwrap(), Money::parse("1000.00").unwrap());

    engine
        .add_invoice_items(
            invoice_id,
            vec![NewInvoiceItem {
                product_id: None,
                description: Some("Delivery".to_string()),
                unit: UnitType::Piece,
                quantity: Quantity(1),
                unit_price: Money::parse("500.00").unwrap(),
                is_misc_item: true,
                is_non_stock_item: true,
                t_iron: None,
            }],
            "2026-03-02",
            "09:00:00",
        )
        .await
        .unwrap();
    let invoice = engine.get_invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.grand_total, Money::parse("1500.00").unwrap());
    assert_eq!(engine.get_customer_balance(customer_id).await.unwrap(), Money::parse("1500.00").unwrap());

    let delivery_item_id = engine
        .invoice_items(invoice_id)
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.description.as_deref() == Some("Delivery"))
        .unwrap()
        .id;
    engine
        .update_invoice_item_quantity(delivery_item_id, Quantity(2), "2026-03-03", "09:00:00")
        .await
        .unwrap();
    let invoice = engine.get_invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.grand_total, Money::parse("2000.00").unwrap());

    let labour_item_id = engine
        .invoice_items(invoice_id)
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.description.as_deref() == Some("Labour"))
        .unwrap()
        .id;
    engine
        .remove_invoice_items(vec![labour_item_id], "2026-03-04", "09:00:00")
        .await
        .unwrap();
    let invoice = engine.get_invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.grand_total, Money::parse("1000.00").unwrap());
    assert_eq!(engine.get_customer_balance(customer_id).await.unwrap(), Money::parse("1000.00").unwrap());

    engine.delete_invoice(invoice_id, "2026-03-05", "09:00:00").await.unwrap();
    assert_eq!(engine.get_customer_balance(customer_id).await.unwrap(), Money::ZERO);
    assert!(engine.get_invoice(invoice_id).await.is_err());
}

#[tokio::test]
async fn scenario_standing_credit_applies_to_next_invoice() {
    let (engine, customer_id, _product_id) = seeded_engine().await;

    let first = engine
        .create_invoice(
            customer_id,
            vec![NewInvoiceItem {
                product_id: None,
                description: Some("Service fee".to_string()),
                unit: UnitType::Piece,
                quantity: Quantity(1),
                unit_price: Money::parse("1000.00").unwrap(),
                is_misc_item: true,
                is_non_stock_item: true,
                t_iron: None,
            }],
            "2026-03-01",
            "09:00:00",
        )
        .await
        .unwrap();

    engine
        .record_payment(customer_id, Some(first), Money::parse("1400.00").unwrap(), "cash", None, "2026-03-02", "09:00:00")
        .await
        .unwrap();
    assert_eq!(engine.get_customer_balance(customer_id).await.unwrap(), Money::parse("-400.00").unwrap());

    let second = engine
        .create_invoice_with_credit(
            customer_id,
            vec![NewInvoiceItem {
                product_id: None,
                description: Some("Service fee".to_string()),
                unit: UnitType::Piece,
                quantity: Quantity(1),
                unit_price: Money::parse("900.00").unwrap(),
                is_misc_item: true,
                is_non_stock_item: true,
                t_iron: None,
            }],
            Some(Money::parse("400.00").unwrap()),
            "2026-03-03",
            "09:00:00",
        )
        .await
        .unwrap();

    let second_invoice = engine.get_invoice(second).await.unwrap();
    assert_eq!(second_invoice.payment_amount, Money::parse("400.00").unwrap());
    assert_eq!(second_invoice.remaining_balance, Money::parse("500.00").unwrap());
    // The 400 of standing credit is now spent, so the customer's overall
    // ledger balance is what's left owing across both invoices: 1000 -
    // 1400 + 900 - 400 = 100, not the 500 still open on invoice 2 alone.
    assert_eq!(engine.get_customer_balance(customer_id).await.unwrap(), Money::parse("100.00").unwrap());

    let reconciled = engine.reconcile_customer_balance(customer_id).await.unwrap();
    assert_eq!(reconciled, Money::parse("100.00").unwrap());
}

#[tokio::test]
async fn scenario_force_delete_invoice_ignoring_its_payment_voids_the_payment_not_the_debt() {
    let (engine, customer_id, _product_id) = seeded_engine().await;

    let invoice_id = engine
        .create_invoice(
            customer_id,
            vec![NewInvoiceItem {
                product_id: None,
                description: Some("Service fee".to_string()),
                unit: UnitType::Piece,
                quantity: Quantity(1),
                unit_price: Money::parse("1000.00").unwrap(),
                is_misc_item: true,
                is_non_stock_item: true,
                t_iron: None,
            }],
            "2026-03-01",
            "09:00:00",
        )
        .await
        .unwrap();

    engine
        .record_payment(customer_id, Some(invoice_id), Money::parse("1000.00").unwrap(), "cash", None, "2026-03-02", "09:00:00")
        .await
        .unwrap();
    assert_eq!(engine.get_customer_balance(customer_id).await.unwrap(), Money::ZERO);

    // Deleting the invoice drops its own debit; discarding ("ignoring")
    // the payment voids the credit it posted rather than leaving it
    // standing, so the customer is left owing what they'd paid.
    engine
        .force_delete_invoice(invoice_id, ForceDeleteMode::Ignore, "2026-03-03", "09:00:00")
        .await
        .unwrap();

    assert_eq!(engine.get_customer_balance(customer_id).await.unwrap(), Money::parse("1000.00").unwrap());
    assert!(engine.get_invoice(invoice_id).await.is_err());
}

#[tokio::test]
async fn scenario_manual_cash_flow_entry_recorded_independent_of_invoices() {
    let (engine, _customer_id, _product_id) = seeded_engine().await;
    let entry_id = engine
        .record_cash_flow(
            CashFlowDirection::Outgoing,
            "rent",
            Money::parse("2000.00").unwrap(),
            "cash",
            None,
            "2026-02-01",
            "09:00:00",
        )
        .await
        .unwrap();
    assert!(entry_id > 0);
}
