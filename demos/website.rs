//! A static website on S3, deployed against an in-memory stand-in for the
//! cloud. The same resources are deployed twice: once declared directly in
//! the program, once wrapped in an `AwsS3Website` component.
//!
//! Run with `cargo run --example website --features logging`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kumitate::{
    Component, Executor, Input, Inputs, MaterializeRequest, Options, Output, Program, Resource,
    ResourceOptions,
};
use serde_json::{Value, json};

/// A bucket configured for static hosting with one public object per file.
struct Website {
    bucket: Resource,
    url: Output<String>,
}

impl Website {
    /// Declares the website's resources, each with the options `placed`
    /// returns.
    fn declare(
        program: &mut Program,
        files: &[&str],
        placed: impl Fn() -> ResourceOptions,
    ) -> anyhow::Result<Self> {
        let bucket = program.declare("my-bucket", "aws:s3:Bucket", Inputs::new(), placed())?;

        let website = program.declare(
            "website",
            "aws:s3:BucketWebsiteConfiguration",
            Inputs::new()
                .set("bucket", bucket.id())
                .set("indexDocument", Inputs::new().set("suffix", "index.html")),
            placed(),
        )?;

        let ownership = program.declare(
            "ownership-controls",
            "aws:s3:BucketOwnershipControls",
            Inputs::new()
                .set("bucket", bucket.id())
                .set("rule", Inputs::new().set("objectOwnership", "ObjectWriter")),
            placed(),
        )?;

        let access = program.declare(
            "public-access-block",
            "aws:s3:BucketPublicAccessBlock",
            Inputs::new()
                .set("bucket", bucket.id())
                .set("blockPublicAcls", false),
            placed(),
        )?;

        for &file in files {
            program.declare(
                file,
                "aws:s3:BucketObject",
                Inputs::new()
                    .set("bucket", bucket.id())
                    .set("source", file)
                    .set("contentType", "text/html")
                    .set("acl", "public-read"),
                placed().depends_on(&ownership).depends_on(&access),
            )?;
        }

        let url = website
            .output_as::<String>("websiteEndpoint")
            .map(|endpoint| format!("http://{endpoint}"));

        Ok(Self { bucket, url })
    }
}

/// The website as a component. Consumers only see its registered outputs.
struct AwsS3Website {
    component: Component,
}

impl AwsS3Website {
    fn new(
        program: &mut Program,
        name: &str,
        files: &[&str],
        options: ResourceOptions,
    ) -> anyhow::Result<Self> {
        let component = program.component(name, "quickstart:index:AwsS3Website", options)?;
        let site = Website::declare(program, files, || {
            ResourceOptions::new().parent(&component)
        })?;

        program.register_outputs(
            &component,
            [
                ("url", Input::from(&site.url)),
                ("bucketName", Input::from(site.bucket.id())),
            ],
        );

        Ok(Self { component })
    }

    fn output(&self, name: &str) -> Output<Value> {
        self.component
            .output(name)
            .unwrap_or_else(|| Output::of(Value::Null))
    }
}

/// Pretends to be a cloud provider. Assigns IDs and endpoints, remembers what
/// it created.
#[derive(Default)]
struct Cloud {
    counter: AtomicU64,
    created: Mutex<Vec<String>>,
}

impl Cloud {
    fn create(&self, request: &MaterializeRequest) -> anyhow::Result<BTreeMap<String, Value>> {
        // some latency so the progress bars have something to show
        std::thread::sleep(Duration::from_millis(300));

        let serial = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{serial:04x}", request.name());

        let mut attributes = BTreeMap::new();
        attributes.insert("id".to_string(), json!(id));
        attributes.insert("arn".to_string(), json!(format!("arn:aws:s3:::{id}")));

        match request.kind() {
            "aws:s3:BucketWebsiteConfiguration" => {
                let bucket = request
                    .input("bucket")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow::anyhow!("website configuration needs a bucket"))?;
                attributes.insert(
                    "websiteEndpoint".to_string(),
                    json!(format!("{bucket}.s3-website-us-east-1.amazonaws.com")),
                );
            }
            "aws:s3:BucketObject" => {
                attributes.insert("etag".to_string(), json!(request.fingerprint.to_hex()));
            }
            _ => {}
        }

        if let Ok(mut created) = self.created.lock() {
            created.push(request.urn.to_string());
        }

        Ok(attributes)
    }
}

/// Deploys `program` against a fresh cloud and prints what happened.
fn deploy(program: Program) -> anyhow::Result<()> {
    let deployment = program.finish()?;
    println!("{deployment}");

    let cloud = Cloud::default();
    let provider = |request: &MaterializeRequest| cloud.create(request);

    let report = Executor::new(Options::new().progress(true)).run(&deployment, &provider)?;
    println!("{report}");

    let created = cloud.created.lock().map(|c| c.len()).unwrap_or_default();
    println!("{created} resources created");

    Ok(())
}

fn main() -> anyhow::Result<()> {
    kumitate::init_logging()?;

    // the resources straight in the program
    let mut program = Program::new("quickstart");
    let site = Website::declare(&mut program, &["index.html"], ResourceOptions::new)?;
    program.export("bucketName", site.bucket.id());
    program.export("url", &site.url);
    deploy(program)?;

    // the same resources behind a component
    let mut program = Program::new("quickstart");
    let site = AwsS3Website::new(
        &mut program,
        "my-website",
        &["index.html", "about.html"],
        ResourceOptions::new(),
    )?;
    program.export("bucketName", site.output("bucketName"));
    program.export("url", site.output("url"));
    deploy(program)?;

    Ok(())
}
