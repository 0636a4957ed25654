use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    BehaviorKind, BehaviorRecord, NewProduct, Product, SegmentDefinition, ShopDatabase, UserProfile,
};

const PRODUCT_COLUMNS: &str = "id, name, sku, price, original_price, stock, is_active, \
     ai_recommended_price, demand_score, popularity_score, seasonal_factor, views_count, \
     sales_count, rating_average, rating_count, created_at, updated_at";

const PROFILE_COLUMNS: &str = "user_id, username, customer_segment, lifetime_value, \
     total_orders, total_spent, average_order_value, last_purchase_date, created_at, updated_at";

/// RFC3339文字列を日時に変換（rusqliteのエラー型で返す）
pub(crate) fn parse_datetime(value: &str, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_e| {
            rusqlite::Error::InvalidColumnType(0, column.to_string(), rusqlite::types::Type::Text)
        })
}

/// 保存されたJSONテキストを変換（壊れていれば変換エラー）
fn parse_json(value: &str, column: usize) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

/// 商品を書き込む（インポートのトランザクション内からも利用）
pub(crate) fn write_product(conn: &Connection, product: &NewProduct) -> Result<i64> {
    let now = Utc::now().to_rfc3339();

    let product_id = conn
        .prepare(
            "INSERT INTO products
             (name, sku, price, original_price, stock, is_active, demand_score, popularity_score,
              seasonal_factor, views_count, sales_count, rating_average, rating_count,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?
        .insert(params![
            product.name,
            product.sku,
            product.price,
            product.original_price,
            product.stock,
            product.is_active,
            product.demand_score,
            product.popularity_score,
            product.seasonal_factor,
            product.views_count,
            product.sales_count,
            product.rating_average,
            product.rating_count,
            now,
            now,
        ])
        .with_context(|| format!("failed to insert product {}", product.sku))?;

    tracing::debug!(product_id, sku = %product.sku, "Inserted product");
    Ok(product_id)
}

/// 顧客プロフィールを書き込む（インポートのトランザクション内からも利用）
pub(crate) fn write_user_profile(conn: &Connection, profile: &UserProfile) -> Result<()> {
    conn.execute(
        "INSERT INTO user_profiles
         (user_id, username, customer_segment, lifetime_value, total_orders, total_spent,
          average_order_value, last_purchase_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(user_id) DO UPDATE SET
            username = excluded.username,
            customer_segment = excluded.customer_segment,
            lifetime_value = excluded.lifetime_value,
            total_orders = excluded.total_orders,
            total_spent = excluded.total_spent,
            average_order_value = excluded.average_order_value,
            last_purchase_date = excluded.last_purchase_date,
            updated_at = excluded.updated_at",
        params![
            profile.user_id,
            profile.username,
            profile.customer_segment,
            profile.lifetime_value,
            profile.total_orders,
            profile.total_spent,
            profile.average_order_value,
            profile.last_purchase_date.map(|dt| dt.to_rfc3339()),
            profile.created_at.to_rfc3339(),
            profile.updated_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("failed to upsert profile for user {}", profile.user_id))?;

    Ok(())
}

/// 行動を書き込む（インポートのトランザクション内からも利用）
pub(crate) fn write_behavior(conn: &Connection, record: &BehaviorRecord) -> Result<i64> {
    let metadata_json = if let Some(metadata) = &record.metadata {
        Some(serde_json::to_string(metadata)?)
    } else {
        None
    };

    let behavior_id = conn
        .prepare(
            "INSERT INTO user_behaviors
             (user_id, product_id, behavior_type, session_id, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?
        .insert(params![
            record.user_id,
            record.product_id,
            record.kind.as_str(),
            record.session_id,
            metadata_json,
            record.timestamp.to_rfc3339(),
        ])
        .with_context(|| format!("failed to record {} for user {}", record.kind, record.user_id))?;

    Ok(behavior_id)
}

/// セグメント定義をすべて削除（再学習のトランザクション内で利用）
pub(crate) fn clear_segment_definitions(conn: &Connection) -> Result<usize> {
    let removed = conn.execute("DELETE FROM customer_segments", [])?;
    Ok(removed)
}

/// 顧客セグメントを書き込む（トランザクション内からも利用）
pub(crate) fn write_customer_segment(
    conn: &Connection,
    user_id: i64,
    segment: &str,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE user_profiles SET customer_segment = ?1, updated_at = ?2 WHERE user_id = ?3",
        params![segment, Utc::now().to_rfc3339(), user_id],
    )?;
    Ok(updated > 0)
}

/// セグメント定義を書き込む（トランザクション内からも利用）
pub(crate) fn write_segment_definition(
    conn: &Connection,
    definition: &SegmentDefinition,
) -> Result<()> {
    conn.execute(
        "INSERT INTO customer_segments (name, description, criteria, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(name) DO UPDATE SET
            description = excluded.description,
            criteria = excluded.criteria",
        params![
            definition.name,
            definition.description,
            serde_json::to_string(&definition.criteria)?,
            definition.created_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("failed to upsert segment definition {}", definition.name))?;
    Ok(())
}

/// AI推奨価格を書き込む（価格更新のトランザクション内からも利用）
pub(crate) fn write_ai_recommended_price(
    conn: &Connection,
    product_id: i64,
    price: f64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE products SET ai_recommended_price = ?1, updated_at = ?2 WHERE id = ?3",
        params![price, Utc::now().to_rfc3339(), product_id],
    )?;
    Ok(updated > 0)
}

impl ShopDatabase {
    /// 商品を登録
    pub fn insert_product(&mut self, product: &NewProduct) -> Result<i64> {
        write_product(&self.connection, product)
    }

    /// 商品を1件取得
    pub fn get_product(&self, product_id: i64) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = self
            .connection
            .query_row(&sql, params![product_id], Self::row_to_product)
            .optional()?;
        Ok(product)
    }

    /// 全商品を取得（ID順）
    pub fn get_products(&self) -> Result<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id ASC");
        let mut stmt = self.connection.prepare(&sql)?;
        let product_iter = stmt.query_map([], Self::row_to_product)?;

        let mut products = Vec::new();
        for product in product_iter {
            products.push(product?);
        }

        Ok(products)
    }

    /// 人気スコア上位の商品を取得（同点はID昇順）
    pub fn get_popular_products(&self, limit: usize) -> Result<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             ORDER BY popularity_score DESC, id ASC
             LIMIT ?1"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let product_iter = stmt.query_map(params![limit as i64], Self::row_to_product)?;

        let mut products = Vec::new();
        for product in product_iter {
            products.push(product?);
        }

        Ok(products)
    }

    /// 商品閲覧を記録し、閲覧数を加算
    pub fn record_product_view(&mut self, user_id: i64, product_id: i64) -> Result<i64> {
        let tx = self.connection.transaction()?;

        let behavior_id = tx
            .prepare(
                "INSERT INTO user_behaviors (user_id, product_id, behavior_type, session_id, timestamp)
                 VALUES (?1, ?2, ?3, '', ?4)",
            )?
            .insert(params![
                user_id,
                product_id,
                BehaviorKind::View.as_str(),
                Utc::now().to_rfc3339(),
            ])?;

        tx.execute(
            "UPDATE products SET views_count = views_count + 1 WHERE id = ?1",
            params![product_id],
        )?;

        tx.commit()?;
        Ok(behavior_id)
    }

    /// 顧客プロフィールを作成または更新
    pub fn upsert_user_profile(&mut self, profile: &UserProfile) -> Result<()> {
        write_user_profile(&self.connection, profile)
    }

    /// 顧客プロフィールを1件取得
    pub fn get_user_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = ?1");
        let profile = self
            .connection
            .query_row(&sql, params![user_id], Self::row_to_profile)
            .optional()?;
        Ok(profile)
    }

    /// 全顧客プロフィールを取得（ユーザーID順）
    pub fn get_user_profiles(&self) -> Result<Vec<UserProfile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles ORDER BY user_id ASC");
        let mut stmt = self.connection.prepare(&sql)?;
        let profile_iter = stmt.query_map([], Self::row_to_profile)?;

        let mut profiles = Vec::new();
        for profile in profile_iter {
            profiles.push(profile?);
        }

        Ok(profiles)
    }

    /// 注文確定時に購入統計を更新
    pub fn record_purchase(&mut self, user_id: i64, order_total: f64) -> Result<UserProfile> {
        let now = Utc::now().to_rfc3339();

        let updated = self.connection.execute(
            "UPDATE user_profiles
             SET total_orders = total_orders + 1,
                 total_spent = total_spent + ?1,
                 average_order_value = (total_spent + ?1) / (total_orders + 1),
                 last_purchase_date = ?2,
                 updated_at = ?2
             WHERE user_id = ?3",
            params![order_total, now, user_id],
        )?;

        if updated == 0 {
            anyhow::bail!("user profile {user_id} not found");
        }

        self.get_user_profile(user_id)?
            .ok_or_else(|| anyhow::anyhow!("user profile {user_id} not found after update"))
    }

    /// 行動を記録
    pub fn record_behavior(&mut self, record: &BehaviorRecord) -> Result<i64> {
        write_behavior(&self.connection, record)
    }

    /// 指定した種類の行動を取得（記録順）
    pub fn get_behaviors(&self, kinds: &[BehaviorKind]) -> Result<Vec<BehaviorRecord>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=kinds.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, user_id, product_id, behavior_type, session_id, metadata, timestamp
             FROM user_behaviors
             WHERE behavior_type IN ({placeholders})
             ORDER BY id ASC"
        );

        let kind_names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        let mut stmt = self.connection.prepare(&sql)?;
        let record_iter = stmt.query_map(
            rusqlite::params_from_iter(kind_names.iter()),
            Self::row_to_behavior,
        )?;

        let mut records = Vec::new();
        for record in record_iter {
            records.push(record?);
        }

        Ok(records)
    }

    /// AI推奨価格を更新
    pub fn update_ai_recommended_price(&mut self, product_id: i64, price: f64) -> Result<bool> {
        write_ai_recommended_price(&self.connection, product_id, price)
    }

    /// 顧客セグメントを設定
    pub fn set_customer_segment(&mut self, user_id: i64, segment: &str) -> Result<bool> {
        write_customer_segment(&self.connection, user_id, segment)
    }

    /// セグメント定義を作成または更新
    pub fn upsert_segment_definition(&mut self, definition: &SegmentDefinition) -> Result<()> {
        write_segment_definition(&self.connection, definition)
    }

    /// セグメント定義一覧を取得
    pub fn get_segment_definitions(&self) -> Result<Vec<SegmentDefinition>> {
        let mut stmt = self.connection.prepare(
            "SELECT name, description, criteria, created_at
             FROM customer_segments
             ORDER BY id ASC",
        )?;
        let definition_iter = stmt.query_map([], |row| {
            let criteria: String = row.get("criteria")?;
            Ok(SegmentDefinition {
                name: row.get("name")?,
                description: row.get("description")?,
                criteria: parse_json(&criteria, 2)?,
                created_at: parse_datetime(&row.get::<_, String>("created_at")?, "created_at")?,
            })
        })?;

        let mut definitions = Vec::new();
        for definition in definition_iter {
            definitions.push(definition?);
        }

        Ok(definitions)
    }

    /// セグメント別の顧客数を取得
    pub fn segment_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.connection.prepare(
            "SELECT customer_segment, COUNT(*) FROM user_profiles
             WHERE customer_segment IS NOT NULL
             GROUP BY customer_segment
             ORDER BY customer_segment ASC",
        )?;
        let count_iter = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut counts = Vec::new();
        for count in count_iter {
            counts.push(count?);
        }

        Ok(counts)
    }

    /// データベースの行を商品に変換
    pub(crate) fn row_to_product(row: &Row) -> rusqlite::Result<Product> {
        Ok(Product {
            id: row.get("id")?,
            name: row.get("name")?,
            sku: row.get("sku")?,
            price: row.get("price")?,
            original_price: row.get("original_price")?,
            stock: row.get("stock")?,
            is_active: row.get("is_active")?,
            ai_recommended_price: row.get("ai_recommended_price")?,
            demand_score: row.get("demand_score")?,
            popularity_score: row.get("popularity_score")?,
            seasonal_factor: row.get("seasonal_factor")?,
            views_count: row.get("views_count")?,
            sales_count: row.get("sales_count")?,
            rating_average: row.get("rating_average")?,
            rating_count: row.get("rating_count")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?, "created_at")?,
            updated_at: parse_datetime(&row.get::<_, String>("updated_at")?, "updated_at")?,
        })
    }

    /// データベースの行を顧客プロフィールに変換
    pub(crate) fn row_to_profile(row: &Row) -> rusqlite::Result<UserProfile> {
        Ok(UserProfile {
            user_id: row.get("user_id")?,
            username: row.get("username")?,
            customer_segment: row.get("customer_segment")?,
            lifetime_value: row.get("lifetime_value")?,
            total_orders: row.get("total_orders")?,
            total_spent: row.get("total_spent")?,
            average_order_value: row.get("average_order_value")?,
            last_purchase_date: row
                .get::<_, Option<String>>("last_purchase_date")?
                .map(|s| parse_datetime(&s, "last_purchase_date"))
                .transpose()?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?, "created_at")?,
            updated_at: parse_datetime(&row.get::<_, String>("updated_at")?, "updated_at")?,
        })
    }

    /// データベースの行を行動記録に変換
    fn row_to_behavior(row: &Row) -> rusqlite::Result<BehaviorRecord> {
        let kind: String = row.get("behavior_type")?;
        let metadata_json: Option<String> = row.get("metadata")?;

        Ok(BehaviorRecord {
            id: Some(row.get("id")?),
            user_id: row.get("user_id")?,
            product_id: row.get("product_id")?,
            kind: kind.parse().map_err(|_e| {
                rusqlite::Error::InvalidColumnType(
                    0,
                    "behavior_type".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            session_id: row.get("session_id")?,
            metadata: metadata_json.map(|json| parse_json(&json, 5)).transpose()?,
            timestamp: parse_datetime(&row.get::<_, String>("timestamp")?, "timestamp")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product(sku: &str, price: f64, popularity: f64) -> NewProduct {
        NewProduct::new(format!("Product {sku}"), sku, price).with_popularity(popularity)
    }

    #[test]
    fn test_database_creation() -> Result<()> {
        let db = ShopDatabase::new_in_memory()?;
        assert_eq!(db.schema_version, 1);
        Ok(())
    }

    #[test]
    fn test_product_storage() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;

        let product_id = db.insert_product(&sample_product("SKU-1", 1200.0, 4.5).with_stock(7))?;
        assert!(product_id > 0);

        let product = db.get_product(product_id)?.expect("product exists");
        assert_eq!(product.sku, "SKU-1");
        assert_eq!(product.price, 1200.0);
        assert_eq!(product.stock, 7);
        assert!(product.is_active);
        assert!(product.ai_recommended_price.is_none());

        assert!(db.get_product(product_id + 100)?.is_none());

        assert!(db.update_ai_recommended_price(product_id, 999.0)?);
        assert!(!db.update_ai_recommended_price(product_id + 100, 999.0)?);
        let product = db.get_product(product_id)?.expect("product exists");
        assert_eq!(product.ai_recommended_price, Some(999.0));
        Ok(())
    }

    #[test]
    fn test_popular_products_order() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let low = db.insert_product(&sample_product("LOW", 100.0, 1.0))?;
        let high = db.insert_product(&sample_product("HIGH", 100.0, 9.0))?;
        let tie = db.insert_product(&sample_product("TIE", 100.0, 1.0))?;

        let popular = db.get_popular_products(10)?;
        let ids: Vec<i64> = popular.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![high, low, tie]);

        let top_one = db.get_popular_products(1)?;
        assert_eq!(top_one.len(), 1);
        assert_eq!(top_one[0].id, high);
        Ok(())
    }

    #[test]
    fn test_discounted_price() {
        let now = Utc::now();
        let mut product = Product {
            id: 1,
            name: "Lamp".to_string(),
            sku: "LDL001".to_string(),
            price: 2500.0,
            original_price: None,
            stock: 3,
            is_active: true,
            ai_recommended_price: Some(2000.0),
            demand_score: 0.0,
            popularity_score: 0.0,
            seasonal_factor: 1.0,
            views_count: 0,
            sales_count: 0,
            rating_average: 0.0,
            rating_count: 0,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(product.discounted_price(), 2000.0);

        product.ai_recommended_price = Some(3000.0);
        assert_eq!(product.discounted_price(), 2500.0);

        product.ai_recommended_price = None;
        assert_eq!(product.discounted_price(), 2500.0);
    }

    #[test]
    fn test_record_purchase_updates_stats() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        db.upsert_user_profile(&UserProfile::new(1, "alice"))?;

        db.record_purchase(1, 100.0)?;
        let profile = db.record_purchase(1, 300.0)?;

        assert_eq!(profile.total_orders, 2);
        assert_eq!(profile.total_spent, 400.0);
        assert_eq!(profile.average_order_value, 200.0);
        assert!(profile.last_purchase_date.is_some());

        assert!(db.record_purchase(99, 10.0).is_err());
        Ok(())
    }

    #[test]
    fn test_behavior_filtering() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let product_id = db.insert_product(&sample_product("SKU-B", 10.0, 0.0))?;

        db.record_behavior(&BehaviorRecord::new(1, Some(product_id), BehaviorKind::View))?;
        db.record_behavior(&BehaviorRecord::new(1, Some(product_id), BehaviorKind::CartAdd))?;
        db.record_behavior(&BehaviorRecord::new(2, None, BehaviorKind::Search).with_session("s-1"))?;
        db.record_behavior(&BehaviorRecord::new(2, Some(product_id), BehaviorKind::Purchase))?;

        let records = db.get_behaviors(&[BehaviorKind::View, BehaviorKind::Purchase])?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, BehaviorKind::View);
        assert_eq!(records[1].kind, BehaviorKind::Purchase);

        let searches = db.get_behaviors(&[BehaviorKind::Search])?;
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].product_id, None);
        assert_eq!(searches[0].session_id, "s-1");

        assert!(db.get_behaviors(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_record_product_view_increments_count() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let product_id = db.insert_product(&sample_product("SKU-V", 10.0, 0.0))?;

        db.record_product_view(5, product_id)?;
        db.record_product_view(6, product_id)?;

        let product = db.get_product(product_id)?.expect("product exists");
        assert_eq!(product.views_count, 2);
        assert_eq!(db.get_behaviors(&[BehaviorKind::View])?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_customer_segment_assignment() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        db.upsert_user_profile(&UserProfile::new(1, "alice"))?;
        db.upsert_user_profile(&UserProfile::new(2, "bob"))?;

        assert!(db.set_customer_segment(1, "Regular")?);
        assert!(!db.set_customer_segment(42, "Regular")?);

        let counts = db.segment_counts()?;
        assert_eq!(counts, vec![("Regular".to_string(), 1)]);
        Ok(())
    }

    #[test]
    fn test_segment_definition_upsert() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let mut definition = SegmentDefinition {
            name: "High Value".to_string(),
            description: "cluster 0".to_string(),
            criteria: serde_json::json!({"cluster_index": 0}),
            created_at: Utc::now(),
        };
        db.upsert_segment_definition(&definition)?;

        definition.description = "cluster 0 (retrained)".to_string();
        definition.criteria = serde_json::json!({"cluster_index": 0, "members": 3});
        db.upsert_segment_definition(&definition)?;

        let definitions = db.get_segment_definitions()?;
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].description, "cluster 0 (retrained)");
        assert_eq!(definitions[0].criteria["members"], 3);
        Ok(())
    }

    #[test]
    fn test_corrupt_stored_json_is_an_error() -> Result<()> {
        let db = ShopDatabase::new_in_memory()?;
        db.connection.execute(
            "INSERT INTO customer_segments (name, description, criteria, created_at)
             VALUES ('Regular', '', '{broken', ?1)",
            params![Utc::now().to_rfc3339()],
        )?;
        assert!(db.get_segment_definitions().is_err());

        db.connection.execute("DELETE FROM customer_segments", [])?;
        assert!(db.get_segment_definitions()?.is_empty());
        Ok(())
    }
}
