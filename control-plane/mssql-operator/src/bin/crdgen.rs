use kube::core::CustomResourceExt;
use mssql_operator::crd::MsSql;

fn main() {
    let crd = MsSql::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
