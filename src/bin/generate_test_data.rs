use anyhow::{Context, Result};
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use storefront_ai::database::{BehaviorKind, BehaviorRecord, NewProduct};
use storefront_ai::io::ProfileImport;

/// デモ用のNDJSONデータ（商品・顧客・行動履歴）を生成する
///
/// 行動履歴の商品IDは空のデータベースに商品を順に取り込んだ場合の
/// ID（1から連番）を前提にしている。
#[derive(Parser)]
#[command(name = "generate_test_data")]
struct Args {
    /// Output directory
    #[arg(short, long, default_value = "demo_data")]
    out: PathBuf,

    #[arg(long, default_value = "30")]
    products: usize,

    #[arg(long, default_value = "20")]
    customers: usize,

    /// Behaviour events per customer
    #[arg(long, default_value = "15")]
    events: usize,

    #[arg(long, default_value = "42")]
    seed: u64,
}

const ADJECTIVES: [&str; 6] = ["Classic", "Compact", "Deluxe", "Eco", "Smart", "Vintage"];
const NOUNS: [&str; 8] = [
    "Desk Lamp", "Backpack", "Headphones", "Water Bottle", "Notebook", "Sneakers", "Mug", "Watch",
];

fn write_ndjson<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    for record in records {
        writeln!(writer, "{}", serde_json::to_string(record)?)?;
    }
    writer.flush()?;
    Ok(())
}

fn generate_products(rng: &mut StdRng, count: usize) -> Vec<NewProduct> {
    (0..count)
        .map(|i| {
            let name = format!(
                "{} {}",
                ADJECTIVES[i % ADJECTIVES.len()],
                NOUNS[(i / ADJECTIVES.len()) % NOUNS.len()]
            );
            let price = (rng.gen_range(500.0..20_000.0_f64) / 10.0).round() * 10.0;
            let sales_count = rng.gen_range(0..200);

            let mut product = NewProduct::new(name, format!("SKU-{:04}", i + 1), price)
                .with_popularity(rng.gen_range(0.0..10.0))
                .with_stock(rng.gen_range(0..100));
            product.views_count = sales_count * rng.gen_range(5..30);
            product.sales_count = sales_count;
            product.rating_average = rng.gen_range(2.5..5.0);
            product.rating_count = rng.gen_range(0..80);
            product.demand_score = rng.gen_range(0.0..1.0);
            product
        })
        .collect()
}

fn generate_profiles(rng: &mut StdRng, count: usize) -> Vec<ProfileImport> {
    (0..count)
        .map(|i| {
            let total_orders = rng.gen_range(0..40);
            let total_spent = if total_orders == 0 {
                0.0
            } else {
                total_orders as f64 * rng.gen_range(800.0..12_000.0)
            };
            ProfileImport {
                user_id: i as i64 + 1,
                username: format!("customer{:03}", i + 1),
                total_orders,
                total_spent: total_spent.round(),
            }
        })
        .collect()
}

fn generate_behaviors(
    rng: &mut StdRng,
    customers: usize,
    products: usize,
    events: usize,
) -> Vec<BehaviorRecord> {
    let mut records = Vec::with_capacity(customers * events);
    for user in 1..=customers as i64 {
        let session = format!("session-{user:03}");
        for _ in 0..events {
            let product_id = rng.gen_range(1..=products as i64);
            let kind = match rng.gen_range(0..10) {
                0..=5 => BehaviorKind::View,
                6 => BehaviorKind::CartAdd,
                7 => BehaviorKind::Review,
                _ => BehaviorKind::Purchase,
            };
            records.push(BehaviorRecord::new(user, Some(product_id), kind).with_session(&session));
        }
    }
    records
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.products == 0 {
        anyhow::bail!("--products must be at least 1");
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let products = generate_products(&mut rng, args.products);
    let profiles = generate_profiles(&mut rng, args.customers);
    let behaviors = generate_behaviors(&mut rng, args.customers, args.products, args.events);

    fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;
    write_ndjson(&args.out.join("products.ndjson"), &products)?;
    write_ndjson(&args.out.join("profiles.ndjson"), &profiles)?;
    write_ndjson(&args.out.join("behaviors.ndjson"), &behaviors)?;

    println!(
        "✅ テストデータを生成しました: {} (商品 {}, 顧客 {}, 行動 {})",
        args.out.display(),
        products.len(),
        profiles.len(),
        behaviors.len()
    );

    Ok(())
}
