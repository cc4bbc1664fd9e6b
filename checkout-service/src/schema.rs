diesel::table! {
    cart_items (id) {
        id -> Uuid,
        user_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    flash_sales (id) {
        id -> Uuid,
        product_id -> Uuid,
        discount_type -> Varchar,
        discount_value -> Numeric,
        start_date -> Timestamptz,
        end_date -> Timestamptz,
        is_active -> Bool,
        stock_cap -> Nullable<Int4>,
        sales_count -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Nullable<Uuid>,
        flash_sale_id -> Nullable<Uuid>,
        quantity -> Int4,
        price_at_purchase -> Numeric,
        product_name -> Varchar,
        product_image -> Nullable<Varchar>,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Uuid,
        total_amount -> Numeric,
        status -> Varchar,
        order_date -> Timestamptz,
        shipping_address -> Jsonb,
        payment_method -> Varchar,
        transaction_id -> Nullable<Varchar>,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    processed_checkouts (idempotency_key) {
        idempotency_key -> Varchar,
        order_id -> Nullable<Uuid>,
        status -> Nullable<Varchar>,
        total_amount -> Nullable<Numeric>,
        claimed_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        vendor_id -> Uuid,
        name -> Varchar,
        image_url -> Nullable<Varchar>,
        price -> Numeric,
        stock -> Int4,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    reconciliation_issues (id) {
        id -> Uuid,
        order_id -> Nullable<Uuid>,
        product_id -> Nullable<Uuid>,
        flash_sale_id -> Nullable<Uuid>,
        kind -> Varchar,
        detail -> Text,
        resolved -> Bool,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(flash_sales -> products (product_id));
diesel::joinable!(order_items -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    cart_items,
    flash_sales,
    order_items,
    orders,
    outbox_events,
    processed_checkouts,
    products,
    reconciliation_issues,
);
