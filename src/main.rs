use stress_test::{stress_test_convergence, stress_test_scaling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,tessera=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = rt.block_on(async_main()) {
        eprintln!("stress test failed: {err}");
        std::process::exit(1);
    }
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            SYNC STRESS TESTS                                ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // small mesh
    let stats = stress_test_convergence(3, 20, 30).await?;
    stats.print();

    // medium mesh
    let stats = stress_test_convergence(6, 50, 100).await?;
    stats.print();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(8, 2).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
