use chimera_aop::prelude::*;
use chimera_aop_macros::{advised, AspectClass};
use chimera_core::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// ==================== 自定义切面 ====================

/// 审计切面 - 记录每次调用的参数，order 最小，位于最外层
#[derive(AspectClass, Default)]
#[aspect(order = -10)]
struct AuditAspect {
    trail: Mutex<Vec<String>>,
}

impl AuditAspect {
    fn class() -> Class {
        ClassDef::builder::<AuditAspect>("AuditAspect").build()
    }
}

impl Aspect for AuditAspect {
    fn advice(self: Arc<Self>) -> AdviceSlots {
        AdviceSlots::new().before(move |ctx, args| {
            let tag = ctx.option("tag").and_then(Value::as_str).unwrap_or("call");
            self.trail
                .lock()
                .push(format!("[{}] {} {}", tag, ctx.signature(), Value::from(args.to_vec())));
            Ok(())
        })
    }
}

// ==================== 业务服务 ====================

struct GreetingService {
    greeting: String,
}

#[advised]
impl GreetingService {
    #[before(AuditAspect, tag = "greet")]
    #[before(LoggingAspect, log_args = true)]
    #[after_returning(LoggingAspect)]
    fn get_hello(&self, name: &str) -> String {
        format!("{} {}!", self.greeting, name)
    }

    #[around(TimingAspect, threshold_ms = 20)]
    fn slow_report(&self) -> String {
        std::thread::sleep(Duration::from_millis(30));
        "report ready".to_string()
    }
}

struct MathService;

#[advised]
impl MathService {
    #[around(CachingAspect)]
    #[before(AuditAspect, tag = "math")]
    fn fibonacci(&self, n: u64) -> u64 {
        (1..n).fold((0u64, 1u64), |(a, b), _| (b, a + b)).1
    }

    #[after_throwing(ErrorLoggingAspect)]
    fn divide(&self, a: i64, b: i64) -> anyhow::Result<i64> {
        if b == 0 {
            anyhow::bail!("division by zero");
        }
        Ok(a / b)
    }
}

fn arg_i64(args: &[Value], index: usize) -> i64 {
    args.get(index).and_then(Value::as_i64).unwrap_or_default()
}

fn register_services(ctx: &Arc<ApplicationContext>) -> ApplicationResult<()> {
    register_builtin_aspects(ctx)?;
    ctx.register_provider("auditAspect", AuditAspect::default(), AuditAspect::class())?;

    let greeting = ctx
        .environment()
        .get_string_or("demo.greeting", "Hello");
    ctx.register_controller(
        "greetingService",
        GreetingService { greeting },
        ClassDef::builder::<GreetingService>("GreetingService")
            .method("get_hello", |service: &GreetingService, args| {
                let name = args.first().and_then(Value::as_str).unwrap_or("World");
                Ok(json!(service.get_hello(name)))
            })
            .method("slow_report", |service: &GreetingService, _| {
                Ok(json!(service.slow_report()))
            })
            .build(),
    )?;

    ctx.register_provider(
        "mathService",
        MathService,
        ClassDef::builder::<MathService>("MathService")
            .method("fibonacci", |service: &MathService, args| {
                Ok(json!(service.fibonacci(arg_i64(args, 0).max(0) as u64)))
            })
            .method("divide", |service: &MathService, args| {
                Ok(json!(service.divide(arg_i64(args, 0), arg_i64(args, 1))?))
            })
            .build(),
    )?;
    Ok(())
}

// ==================== 主程序 ====================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║        Chimera Framework - AOP Demo               ║");
    println!("╚════════════════════════════════════════════════════╝\n");

    // 查找配置文件
    let config_file = ["demos/app-demo/application.toml", "application.toml"]
        .into_iter()
        .find(|path| std::path::Path::new(path).exists())
        .unwrap_or("application.toml");

    let aop = Arc::new(AopPlugin::new());
    let app = ChimeraApplication::new("ChimeraAopDemo")
        .config_file(config_file)
        .env_prefix("APP_")
        .add_plugin(aop.clone())
        .initializer(register_services)
        .run()
        .await?;

    let context = app.context().clone();
    let greeter = context.get_object("greetingService")?;
    let math = context.get_object("mathService")?;

    println!("\n👋 {}", greeter.invoke("get_hello", &[json!("World")])?);
    println!("📄 {}", greeter.invoke("slow_report", &[])?);

    for _ in 0..2 {
        println!("🔢 fibonacci(40) = {}", math.invoke("fibonacci", &[json!(40)])?);
    }
    println!("➗ 84 / 2 = {}", math.invoke("divide", &[json!(84), json!(2)])?);
    if let Err(e) = math.invoke("divide", &[json!(1), json!(0)]) {
        println!("❌ 1 / 0 failed: {}", e);
    }

    let cache = context.get_object("cachingAspect")?;
    if let Some(cache) = cache.downcast_ref::<CachingAspect>() {
        println!("\n🗄️  Cached results: {}", cache.len());
    }

    let audit = context.get_object("auditAspect")?;
    if let Some(audit) = audit.downcast_ref::<AuditAspect>() {
        println!("\n📝 Audit trail:");
        for entry in audit.trail.lock().iter() {
            println!("   {}", entry);
        }
    }

    if let Some(report) = aop.report() {
        println!("\n📊 AOP report:\n{}", serde_json::to_string_pretty(&report)?);
    }
    if let Some(stats) = aop.cache_stats() {
        println!("📈 Scan cache:\n{}", serde_json::to_string_pretty(&stats)?);
    }

    tracing::info!("Demo finished, shutting down");
    app.shutdown().await;
    Ok(())
}
