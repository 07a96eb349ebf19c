//! Prompt builders for every model call the lifecycle makes.

/// Phase 1: free text to abstract intent graph.
pub fn intent_prompt(user_request: &str) -> String {
    format!(
        r#"You are an expert cloud architect.

Task: convert the user request into a high-level intent graph.

User request:
"{user_request}"

Allowed semantic types (use these ONLY, never provider primitives):
- compute_service        (VMs, containers, serverless runtimes)
- relational_database    (SQL engines)
- object_storage         (blob storage)
- load_balancer          (L4/L7 traffic distribution)
- message_queue          (asynchronous queues)
- pubsub_topic           (event fanout)
- cache_service          (in-memory key-value stores)
- network_container      (network boundary, only when the user draws one)
- network_zone           (zone inside a network container)

Rules:
1. No provider primitives (aws_*, vpc, subnet, security group, IAM).
2. Each node is one business-level role; its semantic role is immutable
   in later stages.
3. "a server" means exactly one compute_service.
4. Assign stable, human-readable ids (web, db, cache). Ids never change
   in later stages.

Output JSON ONLY, in this shape:
{{
  "graph_phase": "intent",
  "resources": [
    {{ "id": "string", "type": "semantic_type", "properties": {{}} }}
  ],
  "edges": [
    {{ "source": "id", "target": "id",
       "relation": "connects_to | reads_from | writes_to | publishes_to | consumes_from" }}
  ],
  "reasoning": "one-paragraph summary of the interpreted intent"
}}"#
    )
}

/// Phase 1 (vision variant): whiteboard diagram to intent graph.
pub fn vision_prompt() -> String {
    r#"You are an expert cloud architect with strong spatial reasoning.

Task: convert the attached architecture sketch into a hierarchical intent
graph.

Method:
1. Containers first: create nodes only for infrastructure boundaries
   (network_container for the outer boundary, network_zone for zones
   inside it). Ignore conceptual groupings such as "User Layer" or a
   legend.
2. Components: identify the icons inside each boundary and map them to
   the semantic types compute_service, relational_database,
   object_storage, load_balancer, message_queue, pubsub_topic,
   cache_service.
3. Hierarchy: a component drawn inside a boundary gets that boundary's
   id as its parent_id.
4. Arrows become connects_to edges. Containment is expressed through
   parent_id, never through edges.

Output JSON ONLY:
{
  "graph_phase": "intent",
  "resources": [
    { "id": "vpc-main", "type": "network_container", "properties": {} },
    { "id": "subnet-public", "type": "network_zone", "parent_id": "vpc-main", "properties": {} },
    { "id": "web", "type": "compute_service", "parent_id": "subnet-public", "properties": {} }
  ],
  "edges": []
}"#
    .to_string()
}

/// Phase 2: policy enforcement over the intent graph.
pub fn policy_prompt(intent_graph_json: &str) -> String {
    format!(
        r#"You are a cloud architecture policy engine.

Task: transform the intent graph below into a reasoned graph by enforcing
the baseline policies. Stay abstract: no infrastructure primitives.

Intent graph:
{intent_graph_json}

Baseline policies:
1. Isolation: databases and caches must not be directly internet-facing.
2. Least privilege: components connect only to what they need.
3. Encryption: data stores are encrypted at rest.
4. Ingress discipline: a public-facing compute_service receives traffic
   through a load_balancer.
5. Blast radius: avoid exposing one component to unrelated consumers.

You MAY remove or re-route edges and add attributes (encrypted: true,
exposure: private). You MUST NOT remove nodes, change node types, or
introduce provider primitives.

Detect violations, apply the minimal fix, re-evaluate, and report how
many violations remain.

Output JSON ONLY:
{{
  "graph_phase": "reasoned",
  "resources": [ /* ALL nodes from the input, unchanged ids and types */ ],
  "edges": [ /* full edge list after fixes */ ],
  "decisions": [
    {{ "trigger": "policy_name", "affected_nodes": ["id"],
       "action": "what_changed", "result": "applied" }}
  ],
  "violations_remaining": 0,
  "reasoning": "short analysis"
}}"#
    )
}

/// Phase 3: materialize the reasoned graph into provider resources.
pub fn expansion_prompt(reasoned_graph_json: &str, execution_mode: &str) -> String {
    format!(
        r#"You are a platform engineer producing a deployable AWS architecture.

Task: expand the reasoned graph into a full implementation graph of
concrete resources.

Reasoned graph:
{reasoned_graph_json}

Execution mode: {execution_mode}

Principles:
1. Semantic preservation (non-negotiable): every node from the reasoned
   graph exists in the output with the SAME id.
2. Materialization: replace each abstract type with its concrete type:
   compute_service -> aws_instance
   relational_database -> aws_db_instance
   object_storage -> aws_s3_bucket
   load_balancer -> aws_lb
   cache_service -> aws_elasticache_cluster
   message_queue -> aws_sqs_queue
   pubsub_topic -> aws_sns_topic
   network_container -> aws_vpc
   network_zone -> aws_subnet
3. Supporting infrastructure: you may add VPCs, subnets, route tables,
   internet/NAT gateways, security groups and IAM roles, but only in
   support of existing nodes. Never invent new workloads.
4. Networking: public-facing services in public subnets, data stores in
   private subnets, access enforced through security groups. Express
   containment through parent_id and contains edges.

Output JSON ONLY:
{{
  "graph_phase": "implementation",
  "resources": [ /* all concrete and supporting nodes */ ],
  "edges": [ /* all edges, referentially valid */ ]
}}"#
    )
}

/// Interactive refinement of the current graph.
pub fn modification_prompt(current_graph_json: &str, instruction: &str, phase: &str) -> String {
    format!(
        r#"You are an expert graph editor.

Task: modify the {phase} graph below according to the user instruction.

Current graph:
{current_graph_json}

User instruction:
"{instruction}"

Rules:
1. Minimal change: touch only what the instruction requires.
2. Identity preservation: never delete nodes unless explicitly told to;
   never change existing ids.
3. Phase constraints: intent graphs hold abstract semantic nodes only;
   implementation graphs hold concrete provider resources.
4. Return the FULL updated graph, not a diff.

Output JSON ONLY:
{{
  "graph_phase": "{phase}",
  "resources": [ /* full updated list */ ],
  "edges": [ /* full updated list */ ],
  "reasoning": "brief description of the change"
}}"#
    )
}

/// Terraform code generation over the implementation graph.
pub fn code_gen_prompt(implementation_graph_json: &str, user_request: &str) -> String {
    format!(
        r#"You are a senior infrastructure engineer.

Task: generate a complete Terraform configuration for the architecture
below, plus a Python verification script.

Architecture graph:
{implementation_graph_json}

User request:
"{user_request}"

Requirements:
1. The configuration targets a local AWS simulator: static test
   credentials, skip_credentials_validation, skip_metadata_api_check,
   skip_requesting_account_id.
2. Security group rules are separate aws_security_group_rule resources;
   never inline ingress/egress blocks.
3. The verification script checks each graph resource via boto3 against
   http://localhost:4566 and, as its FINAL line, prints exactly one JSON
   object mapping every resource id from the graph to "success" or
   "failed".

Output JSON ONLY:
{{
  "hcl_code": "...",
  "test_script": "..."
}}"#
    )
}

/// Blast-radius impact explanation.
pub fn blast_prompt(graph_json: &str, target_node_id: &str, affected: &[String]) -> String {
    let affected_list = affected.join(", ");
    format!(
        r#"You are a chaos engineering expert and solutions architect.

Task: explain the impact of removing node `{target_node_id}` from the
architecture below. Graph traversal already identified the affected set:
[{affected_list}].

Graph:
{graph_json}

Consider direct dependencies, cascading failures, stateful data loss,
and lost connectivity.

Output JSON ONLY:
{{
  "target_node": "{target_node_id}",
  "explanation": "why these nodes are affected",
  "mitigation_strategy": "how to remove the node safely"
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_prompt_carries_request_and_type_set() {
        let prompt = intent_prompt("web server with a database");
        assert!(prompt.contains("web server with a database"));
        assert!(prompt.contains("compute_service"));
        assert!(prompt.contains("relational_database"));
    }

    #[test]
    fn expansion_prompt_names_the_mode() {
        let prompt = expansion_prompt("{}", "draft");
        assert!(prompt.contains("Execution mode: draft"));
    }

    #[test]
    fn modification_prompt_pins_the_phase() {
        let prompt = modification_prompt("{}", "add a cache", "implementation");
        assert!(prompt.contains(r#""graph_phase": "implementation""#));
    }
}
