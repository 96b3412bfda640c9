// CLI wrapper around the enrollment reconciliation engine.
// Loads a CSV export plus JSON mapping tables, runs the pipeline and
// prints the summary; an optional expected-totals file adds the
// discrepancy report. All real logic lives in the library.

use anyhow::{bail, Result};
use std::env;
use std::path::Path;

use enrollment_reconciliation::{
    load_records_csv, EnrollmentPipeline, ExpectedTotals, FacilityMap, PipelineConfig, PlanMap,
    SummaryTable,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 4 {
        eprintln!(
            "Usage: {} <records.csv> <facility_map.json> <plan_map.json> [config.json] [expected.json]",
            args[0]
        );
        bail!("Missing required arguments");
    }

    println!("🏥 Enrollment Reconciliation v{}", enrollment_reconciliation::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load inputs
    println!("\n📂 Loading enrollment records...");
    let records = load_records_csv(Path::new(&args[1]))?;
    println!("✓ Loaded {} records", records.len());

    let facility_map = FacilityMap::from_file(&args[2])?;
    let plan_map = PlanMap::from_file(&args[3])?;
    println!(
        "✓ Mapping tables: {} facilities, {} plan codes",
        facility_map.len(),
        plan_map.len()
    );

    let config = match args.get(4) {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default_config(),
    };

    // 2. Run the pipeline
    println!("\n🔁 Running pipeline...");
    let pipeline = EnrollmentPipeline::new(facility_map, plan_map, config)?;

    let run = match args.get(5) {
        Some(path) => {
            let expected = ExpectedTotals::from_file(path)?;
            pipeline.run_reconciled(&records, &expected)
        }
        None => pipeline.run(&records),
    };

    println!("✓ {} subscriber rows selected", run.subscriber_count);
    if run.excluded_facility_rows > 0 {
        println!("✓ {} rows dropped by excluded-facility policy", run.excluded_facility_rows);
    }
    if run.duplicates_dropped > 0 {
        println!("✓ {} duplicate contract rows dropped", run.duplicates_dropped);
    }

    // 3. Print results
    print_summary("FULL SUMMARY", &run.summary);
    if let Some(filtered) = &run.filtered_summary {
        print_summary("FILTERED SUMMARY", filtered);
    }

    println!("\n📉 Exclusions: {} total", run.exclusions.total_excluded());
    for (status, count) in &run.exclusions.excluded_status_values {
        println!("   status {:<12} {}", status, count);
    }
    for (relation, count) in &run.exclusions.excluded_relation_values {
        println!("   relation {:<10} {}", relation, count);
    }
    if run.exclusions.malformed > 0 {
        println!("   malformed    {}", run.exclusions.malformed);
    }

    if !run.census.is_clean() {
        println!("\n⚠️  Unmapped codes detected:");
        for (code, count) in &run.census.unknown_tier_codes {
            println!("   tier code {:<14} × {}", code, count);
        }
        for (key, count) in &run.census.unmapped_facility_keys {
            println!("   facility key {:<11} × {}", key, count);
        }
        for (code, count) in &run.census.unmapped_plan_codes {
            println!("   plan code {:<14} × {}", code, count);
        }
    }

    if let Some(report) = &run.report {
        println!("\n⚖️  {}", report.summary());
        for delta in report.discrepant_cells() {
            let category = delta
                .plan_category
                .map(|c| c.as_str())
                .unwrap_or("-");
            println!(
                "   {:<14} {:<7} actual {:>6.0}  expected {:>6.0}  delta {:+.0}",
                delta.tier.as_str(),
                category,
                delta.actual,
                delta.expected,
                delta.delta
            );
        }
        if report.is_balanced() {
            println!("✅ Reconciled: all deltas zero");
        }
    }

    Ok(())
}

fn print_summary(title: &str, table: &SummaryTable) {
    println!("\n📊 {}", title);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for cell in &table.cells {
        let category = cell.plan_category.map(|c| c.as_str()).unwrap_or("-");
        println!(
            "   {:<10} {:<35} {:<14} {:<7} {:>8.0}",
            cell.facility_id,
            cell.facility_name,
            cell.tier.as_str(),
            category,
            cell.value
        );
    }

    println!("   ─────────────────────────────────────────");
    for (tier, total) in &table.tier_totals {
        println!("   {:<14} total {:>8.0}", tier.as_str(), total);
    }
    println!("   GRAND TOTAL {:>12.0}", table.grand_total);
}
