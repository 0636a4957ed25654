use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 商品モデル
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub sku: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub stock: i64,
    pub is_active: bool,
    pub ai_recommended_price: Option<f64>,
    pub demand_score: f64,
    pub popularity_score: f64,
    pub seasonal_factor: f64,
    pub views_count: i64,
    pub sales_count: i64,
    pub rating_average: f64,
    pub rating_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// AI推奨価格が定価より安ければそれを、そうでなければ定価を返す
    pub fn discounted_price(&self) -> f64 {
        match self.ai_recommended_price {
            Some(ai_price) if ai_price > 0.0 && ai_price < self.price => ai_price,
            _ => self.price,
        }
    }
}

/// 新規商品（登録用）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewProduct {
    pub name: String,
    pub sku: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub stock: i64,
    pub is_active: bool,
    pub demand_score: f64,
    pub popularity_score: f64,
    pub seasonal_factor: f64,
    pub views_count: i64,
    pub sales_count: i64,
    pub rating_average: f64,
    pub rating_count: i64,
}

impl Default for NewProduct {
    fn default() -> Self {
        Self {
            name: String::new(),
            sku: String::new(),
            price: 0.0,
            original_price: None,
            stock: 0,
            is_active: true,
            demand_score: 0.0,
            popularity_score: 0.0,
            seasonal_factor: 1.0,
            views_count: 0,
            sales_count: 0,
            rating_average: 0.0,
            rating_count: 0,
        }
    }
}

impl NewProduct {
    /// 新規作成
    pub fn new(name: impl Into<String>, sku: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            sku: sku.into(),
            price,
            ..Default::default()
        }
    }

    /// 人気スコアを設定
    pub fn with_popularity(mut self, popularity_score: f64) -> Self {
        self.popularity_score = popularity_score;
        self
    }

    /// 在庫数を設定
    pub fn with_stock(mut self, stock: i64) -> Self {
        self.stock = stock;
        self
    }
}

/// 顧客プロフィールモデル
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: String,
    pub customer_segment: Option<String>,
    pub lifetime_value: f64,
    pub total_orders: i64,
    pub total_spent: f64,
    pub average_order_value: f64,
    pub last_purchase_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// 新規作成
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            username: username.into(),
            customer_segment: None,
            lifetime_value: 0.0,
            total_orders: 0,
            total_spent: 0.0,
            average_order_value: 0.0,
            last_purchase_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 購入統計を設定（平均注文額は再計算）
    pub fn with_purchase_stats(mut self, total_orders: i64, total_spent: f64) -> Self {
        self.total_orders = total_orders;
        self.total_spent = total_spent;
        self.average_order_value = if total_orders > 0 {
            total_spent / total_orders as f64
        } else {
            0.0
        };
        self
    }
}

/// 行動の種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    View,
    CartAdd,
    CartRemove,
    Purchase,
    Review,
    Search,
}

impl BehaviorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorKind::View => "view",
            BehaviorKind::CartAdd => "cart_add",
            BehaviorKind::CartRemove => "cart_remove",
            BehaviorKind::Purchase => "purchase",
            BehaviorKind::Review => "review",
            BehaviorKind::Search => "search",
        }
    }
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BehaviorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "view" => Ok(BehaviorKind::View),
            "cart_add" => Ok(BehaviorKind::CartAdd),
            "cart_remove" => Ok(BehaviorKind::CartRemove),
            "purchase" => Ok(BehaviorKind::Purchase),
            "review" => Ok(BehaviorKind::Review),
            "search" => Ok(BehaviorKind::Search),
            other => Err(anyhow::anyhow!("unknown behavior type '{other}'")),
        }
    }
}

/// 行動記録モデル
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BehaviorRecord {
    /// データベースID（新規作成時はNone）
    #[serde(default)]
    pub id: Option<i64>,
    pub user_id: i64,
    /// 検索などは商品に紐付かない
    #[serde(default)]
    pub product_id: Option<i64>,
    pub kind: BehaviorKind,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl BehaviorRecord {
    /// 新規作成
    pub fn new(user_id: i64, product_id: Option<i64>, kind: BehaviorKind) -> Self {
        Self {
            id: None,
            user_id,
            product_id,
            kind,
            session_id: String::new(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    /// セッションIDを設定
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// 顧客セグメント定義
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentDefinition {
    pub name: String,
    pub description: String,
    /// クラスタ番号・重心などの分類基準（JSON）
    pub criteria: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
